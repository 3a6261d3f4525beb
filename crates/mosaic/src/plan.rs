//! Read plans: what to read from which tile, and where it lands.

use mosaico_core::{PixelWindow, Rect, Subsampling, TileId};
use serde::Serialize;

/// One read instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PlanEntry {
    pub tile_id: TileId,
    pub source_id: String,
    /// Subsampling of the tile, which is the plan's selected level.
    pub subsampling: Subsampling,
    /// Area of the mosaic this entry is responsible for, in finest-resolution pixels.
    /// Destinations of different entries never overlap.
    pub destination: Rect,
    /// Top-left of the destination in the output raster, in output pixels.
    pub destination_offset: (u64, u64),
    /// Pixels to read from the tile's source, already offset by the tile's window.
    pub source_region: PixelWindow,
}

/// Ordered read instructions answering one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadPlan {
    /// The requested region, in finest-resolution pixels.
    pub region: Rect,
    pub requested: Subsampling,
    pub selected: Subsampling,
    /// Output raster size `(width, height)` at the selected level.
    pub output_size: (u64, u64),
    pub entries: Vec<PlanEntry>,
    /// Parts of the region no tile covers, as disjoint rectangles.
    pub uncovered: Vec<Rect>,
}

impl ReadPlan {
    /// Whether the entries cover the whole region.
    pub fn is_complete(&self) -> bool {
        self.uncovered.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PlanEntry> {
        self.entries.iter()
    }

    pub fn covered_area(&self) -> u64 {
        self.entries.iter().map(|e| e.destination.area()).sum()
    }

    pub fn uncovered_area(&self) -> u64 {
        self.uncovered.iter().map(Rect::area).sum()
    }

    /// Distinct tiles in first-use order.
    pub fn tile_ids(&self) -> Vec<&TileId> {
        let mut seen = std::collections::HashSet::new();
        self.entries
            .iter()
            .map(|e| &e.tile_id)
            .filter(|id| seen.insert(*id))
            .collect()
    }

    /// Entries sourcing the pixel at `(x, y)` of the mosaic.
    pub fn entries_at(&self, x: i64, y: i64) -> impl Iterator<Item = &PlanEntry> {
        self.entries
            .iter()
            .filter(move |e| e.destination.contains_point(x, y))
    }
}

impl<'a> IntoIterator for &'a ReadPlan {
    type Item = &'a PlanEntry;
    type IntoIter = std::slice::Iter<'a, PlanEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
