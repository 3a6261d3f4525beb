//! Tile descriptors

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geometry::{PixelWindow, Rect};
use crate::source::TileSource;

/// Stable identity of a tile. Ordered lexicographically; the selector uses this
/// order to break priority ties.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TileId(String);

impl TileId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TileId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TileId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Horizontal and vertical decimation relative to the mosaic's finest resolution.
///
/// Ordered from finest to coarsest: by pixel area `x * y`, then `x`, then `y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subsampling {
    pub x: u32,
    pub y: u32,
}

impl Subsampling {
    /// Full resolution.
    pub const FULL: Subsampling = Subsampling { x: 1, y: 1 };

    pub fn new(x: u32, y: u32) -> Result<Self> {
        if x == 0 || y == 0 {
            return Err(Error::InvalidParameter {
                name: "subsampling",
                value: format!("{x}x{y}"),
                reason: "factors must be >= 1".into(),
            });
        }
        Ok(Self { x, y })
    }

    /// Same factor on both axes.
    pub fn uniform(factor: u32) -> Result<Self> {
        Self::new(factor, factor)
    }

    pub fn is_uniform(&self) -> bool {
        self.x == self.y
    }

    /// Both factors are at least those of `other`.
    pub fn at_least(&self, other: &Subsampling) -> bool {
        self.x >= other.x && self.y >= other.y
    }

    /// Both factors are at most those of `other`.
    pub fn at_most(&self, other: &Subsampling) -> bool {
        self.x <= other.x && self.y <= other.y
    }

    fn area(&self) -> u64 {
        self.x as u64 * self.y as u64
    }
}

impl Ord for Subsampling {
    fn cmp(&self, other: &Self) -> Ordering {
        self.area()
            .cmp(&other.area())
            .then(self.x.cmp(&other.x))
            .then(self.y.cmp(&other.y))
    }
}

impl PartialOrd for Subsampling {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Subsampling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.x, self.y)
    }
}

/// Parses `"4"` as uniform 4x4 and `"2x4"` as x = 2, y = 4.
impl FromStr for Subsampling {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parse = |v: &str| {
            v.trim().parse::<u32>().map_err(|e| Error::InvalidParameter {
                name: "subsampling",
                value: s.to_string(),
                reason: e.to_string(),
            })
        };
        match s.split_once(['x', 'X']) {
            Some((x, y)) => Subsampling::new(parse(x)?, parse(y)?),
            None => Subsampling::uniform(parse(s)?),
        }
    }
}

/// One tile of the mosaic. Immutable once built.
#[derive(Debug, Clone)]
pub struct TileDescriptor {
    id: TileId,
    extent: Rect,
    subsampling: Subsampling,
    source: Arc<dyn TileSource>,
    window: Option<PixelWindow>,
}

impl TileDescriptor {
    /// Describe a tile whose source holds exactly this tile's pixels.
    pub fn new(
        id: impl Into<TileId>,
        extent: Rect,
        subsampling: Subsampling,
        source: Arc<dyn TileSource>,
    ) -> Self {
        Self {
            id: id.into(),
            extent,
            subsampling,
            source,
            window: None,
        }
    }

    /// Place the tile at a window of a source shared with other tiles.
    pub fn with_window(mut self, window: PixelWindow) -> Self {
        self.window = Some(window);
        self
    }

    pub fn id(&self) -> &TileId {
        &self.id
    }

    pub fn extent(&self) -> &Rect {
        &self.extent
    }

    pub fn subsampling(&self) -> Subsampling {
        self.subsampling
    }

    pub fn source(&self) -> &Arc<dyn TileSource> {
        &self.source
    }

    pub fn source_id(&self) -> &str {
        self.source.source_id()
    }

    pub fn window(&self) -> Option<&PixelWindow> {
        self.window.as_ref()
    }

    /// Size of the tile's own pixel grid `(width, height)`.
    pub fn pixel_size(&self) -> (u64, u64) {
        (
            self.extent.width().div_ceil(self.subsampling.x as u64),
            self.extent.height().div_ceil(self.subsampling.y as u64),
        )
    }

    /// Check the data-model invariants.
    pub fn validate(&self) -> Result<()> {
        if let Err(e) = self.extent.validate() {
            return Err(self.invalid(e.to_string()));
        }
        if self.subsampling.x == 0 || self.subsampling.y == 0 {
            return Err(self.invalid(format!("subsampling {} has a zero factor", self.subsampling)));
        }
        if let Some(window) = &self.window {
            let (w, h) = self.pixel_size();
            if window.width < w || window.height < h {
                return Err(self.invalid(format!(
                    "window {}x{} is smaller than the tile's {w}x{h} pixels",
                    window.width, window.height
                )));
            }
        }
        Ok(())
    }

    /// Source pixels backing `area`, a part of this tile's extent.
    ///
    /// The start rounds down and the end rounds up, so partially covered source
    /// pixels are included. The result is offset by the tile's window, if any.
    pub fn source_region(&self, area: &Rect) -> PixelWindow {
        let sx = self.subsampling.x as i64;
        let sy = self.subsampling.y as i64;
        let (w, h) = self.pixel_size();

        let x0 = (area.min_x - self.extent.min_x).div_euclid(sx).max(0) as u64;
        let y0 = (area.min_y - self.extent.min_y).div_euclid(sy).max(0) as u64;
        let x1 = (ceil_div(area.max_x - self.extent.min_x, sx) as u64).min(w);
        let y1 = (ceil_div(area.max_y - self.extent.min_y, sy) as u64).min(h);

        let (ox, oy) = self.window.map(|win| (win.x, win.y)).unwrap_or((0, 0));
        PixelWindow::new(ox + x0, oy + y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
    }

    fn invalid(&self, reason: String) -> Error {
        Error::InvalidTile {
            id: self.id.clone(),
            reason,
        }
    }
}

/// Integer division rounding toward positive infinity.
pub(crate) fn ceil_div(a: i64, b: i64) -> i64 {
    -((-a).div_euclid(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn tile(extent: Rect, s: Subsampling) -> TileDescriptor {
        TileDescriptor::new("t", extent, s, Arc::new(MemorySource::new("m", vec![0u8; 4])))
    }

    #[test]
    fn test_subsampling_order_is_finest_first() {
        let mut levels = vec![
            Subsampling::new(4, 4).unwrap(),
            Subsampling::new(1, 1).unwrap(),
            Subsampling::new(2, 1).unwrap(),
            Subsampling::new(1, 2).unwrap(),
            Subsampling::new(2, 2).unwrap(),
        ];
        levels.sort();
        let names: Vec<String> = levels.iter().map(|s| s.to_string()).collect();
        assert_eq!(names, vec!["1x1", "1x2", "2x1", "2x2", "4x4"]);
    }

    #[test]
    fn test_subsampling_rejects_zero() {
        assert!(Subsampling::new(0, 1).is_err());
        assert!(Subsampling::uniform(0).is_err());
    }

    #[test]
    fn test_subsampling_from_str() {
        assert_eq!("4".parse::<Subsampling>().unwrap(), Subsampling::uniform(4).unwrap());
        assert_eq!("2x8".parse::<Subsampling>().unwrap(), Subsampling::new(2, 8).unwrap());
        assert!("0".parse::<Subsampling>().is_err());
        assert!("ax2".parse::<Subsampling>().is_err());
    }

    #[test]
    fn test_pixel_size_rounds_up() {
        let t = tile(Rect::new(0, 0, 10, 7).unwrap(), Subsampling::uniform(4).unwrap());
        assert_eq!(t.pixel_size(), (3, 2));
    }

    #[test]
    fn test_source_region_aligned() {
        let t = tile(Rect::new(100, 100, 200, 200).unwrap(), Subsampling::uniform(2).unwrap());
        let region = t.source_region(&Rect::new(120, 150, 200, 160).unwrap());
        assert_eq!(region, PixelWindow::new(10, 25, 40, 5));
    }

    #[test]
    fn test_source_region_unaligned_and_windowed() {
        let t = tile(Rect::new(0, 0, 16, 16).unwrap(), Subsampling::uniform(4).unwrap())
            .with_window(PixelWindow::new(64, 32, 4, 4));
        // Partially covered source pixels on both ends are included
        let region = t.source_region(&Rect::new(3, 5, 9, 8).unwrap());
        assert_eq!(region, PixelWindow::new(64, 33, 3, 1));
    }

    #[test]
    fn test_validate_window_too_small() {
        let t = tile(Rect::new(0, 0, 16, 16).unwrap(), Subsampling::FULL)
            .with_window(PixelWindow::new(0, 0, 8, 16));
        assert!(matches!(t.validate(), Err(Error::InvalidTile { .. })));
    }

    #[test]
    fn test_validate_rejects_oversized_extent() {
        let t = tile(
            Rect { min_x: i64::MIN / 2 - 10, min_y: 0, max_x: i64::MAX / 2 + 10, max_y: 1 },
            Subsampling::FULL,
        );
        assert!(matches!(t.validate(), Err(Error::InvalidTile { .. })));
    }

    #[test]
    fn test_ceil_div() {
        assert_eq!(ceil_div(7, 2), 4);
        assert_eq!(ceil_div(8, 2), 4);
        assert_eq!(ceil_div(-3, 2), -1);
        assert_eq!(ceil_div(0, 3), 0);
    }
}
