//! Tile list files.
//!
//! A tile list is a JSON array of records:
//!
//! ```json
//! [
//!   { "id": "overview", "extent": [0, 0, 4096, 4096], "subsampling": [4, 4], "path": "ov.tif" },
//!   { "id": "a", "extent": [0, 0, 512, 512], "subsampling": [1, 1], "path": "atlas.bin",
//!     "window": [0, 0, 512, 512] }
//! ]
//! ```
//!
//! Relative paths are resolved against the directory of the list file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;

use mosaico::{FileSource, PixelWindow, Rect, Subsampling, TileDescriptor, TileSource};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TileRecord {
    id: String,
    extent: [i64; 4],
    #[serde(default = "full_resolution")]
    subsampling: [u32; 2],
    path: PathBuf,
    #[serde(default)]
    window: Option<[u64; 4]>,
}

fn full_resolution() -> [u32; 2] {
    [1, 1]
}

/// Read a tile list and turn its records into descriptors.
///
/// Records naming the same file share one source.
pub fn load(path: &Path) -> Result<Vec<TileDescriptor>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tile list {}", path.display()))?;
    let records: Vec<TileRecord> = serde_json::from_str(&text)
        .with_context(|| format!("Invalid tile list {}", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));

    let mut sources: std::collections::HashMap<PathBuf, Arc<dyn TileSource>> =
        std::collections::HashMap::new();
    records
        .into_iter()
        .map(|record| {
            let [min_x, min_y, max_x, max_y] = record.extent;
            let extent = Rect::new(min_x, min_y, max_x, max_y)
                .with_context(|| format!("Tile {}: bad extent", record.id))?;
            let subsampling = Subsampling::new(record.subsampling[0], record.subsampling[1])
                .with_context(|| format!("Tile {}: bad subsampling", record.id))?;

            let file = base.join(&record.path);
            let source = sources
                .entry(file.clone())
                .or_insert_with(|| Arc::new(FileSource::new(file)) as Arc<dyn TileSource>)
                .clone();

            let tile = TileDescriptor::new(record.id, extent, subsampling, source);
            Ok(match record.window {
                Some([x, y, w, h]) => tile.with_window(PixelWindow::new(x, y, w, h)),
                None => tile,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_list(dir: &Path, json: &str) -> PathBuf {
        let path = dir.join("tiles.json");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(json.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let list = write_list(
            dir.path(),
            r#"[
                {"id": "a", "extent": [0, 0, 10, 10], "path": "atlas.bin", "window": [0, 0, 10, 10]},
                {"id": "b", "extent": [10, 0, 20, 10], "subsampling": [1, 1], "path": "atlas.bin", "window": [10, 0, 10, 10]},
                {"id": "ov", "extent": [0, 0, 20, 10], "subsampling": [2, 2], "path": "/abs/ov.tif"}
            ]"#,
        );

        let tiles = load(&list).unwrap();
        assert_eq!(tiles.len(), 3);
        assert_eq!(tiles[0].source_id(), dir.path().join("atlas.bin").display().to_string());
        assert!(Arc::ptr_eq(tiles[0].source(), tiles[1].source()));
        assert_eq!(tiles[1].window().unwrap().x, 10);
        assert_eq!(tiles[2].subsampling(), Subsampling::uniform(2).unwrap());
        assert_eq!(tiles[2].source_id(), "/abs/ov.tif");
    }

    #[test]
    fn test_load_rejects_bad_records() {
        let dir = tempfile::tempdir().unwrap();
        let inverted = write_list(dir.path(), r#"[{"id": "a", "extent": [10, 0, 0, 10], "path": "a"}]"#);
        assert!(load(&inverted).is_err());

        let unknown = write_list(dir.path(), r#"[{"id": "a", "extent": [0, 0, 1, 1], "path": "a", "zoom": 3}]"#);
        assert!(load(&unknown).is_err());
    }
}
