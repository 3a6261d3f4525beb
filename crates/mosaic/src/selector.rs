//! Tile selection: from a region and a target resolution to a read plan.
//!
//! Selection runs in three steps:
//! 1. the catalog picks a resolution level for the target subsampling,
//! 2. the level's tiles intersecting the region are collected,
//! 3. candidates are ranked and clipped against higher-ranked ones so that
//!    every destination pixel is claimed at most once.
//!
//! Ranking is by intersection area with the region, largest first, then by tile
//! id. Identical queries therefore always produce identical plans.

use std::cmp::Reverse;

use mosaico_core::{Error, MosaicOptions, Rect, Result, Subsampling, TileDescriptor};
use tracing::debug;

use crate::catalog::{Level, ResolutionCatalog};
use crate::index::{SpatialIndex, TileKey};
use crate::plan::{PlanEntry, ReadPlan};

/// Read-only view over a mosaic's tiles and indexes that produces read plans.
#[derive(Clone, Copy)]
pub struct TileSelector<'a> {
    tiles: &'a [TileDescriptor],
    index: &'a SpatialIndex,
    catalog: &'a ResolutionCatalog,
    options: &'a MosaicOptions,
}

impl<'a> TileSelector<'a> {
    pub fn new(
        tiles: &'a [TileDescriptor],
        index: &'a SpatialIndex,
        catalog: &'a ResolutionCatalog,
        options: &'a MosaicOptions,
    ) -> Self {
        Self {
            tiles,
            index,
            catalog,
            options,
        }
    }

    /// Build the read plan for `region` at `target`.
    ///
    /// Gaps are reported in [`ReadPlan::uncovered`]; with partial coverage
    /// disallowed they fail the call with [`Error::IncompleteCoverage`].
    pub fn select(&self, region: &Rect, target: Subsampling) -> Result<ReadPlan> {
        region.validate()?;
        if target.x == 0 || target.y == 0 {
            return Err(Error::InvalidParameter {
                name: "targetSubsampling",
                value: target.to_string(),
                reason: "factors must be >= 1".into(),
            });
        }

        let level = self
            .catalog
            .select_level(target, self.options.resolution_policy)?;
        let selected = level.subsampling();

        let mut candidates = self.candidates(level, region);
        candidates.sort_by(|(ka, ia), (kb, ib)| {
            (Reverse(ia.area()), self.tiles[*ka].id()).cmp(&(Reverse(ib.area()), self.tiles[*kb].id()))
        });

        let output_size = (
            region.width().div_ceil(selected.x as u64),
            region.height().div_ceil(selected.y as u64),
        );
        let lattice = OutputLattice::new(region, selected);

        // Claims live in output pixels so that no output pixel is written twice
        let mut claimed: Vec<Rect> = Vec::new();
        let mut entries = Vec::new();

        for (key, intersection) in candidates {
            let tile = &self.tiles[key];
            for piece in remainder(lattice.to_output(&intersection), &claimed) {
                let Some(destination) = lattice.to_mosaic(&piece).intersection(&intersection) else {
                    continue;
                };
                entries.push(PlanEntry {
                    tile_id: tile.id().clone(),
                    source_id: tile.source_id().to_string(),
                    subsampling: selected,
                    destination,
                    destination_offset: (piece.min_x as u64, piece.min_y as u64),
                    source_region: tile.source_region(&destination),
                });
                claimed.push(piece);
            }
        }

        let uncovered = remainder(lattice.output_rect(), &claimed)
            .iter()
            .filter_map(|piece| lattice.to_mosaic(piece).intersection(region))
            .collect();
        let plan = ReadPlan {
            region: *region,
            requested: target,
            selected,
            output_size,
            entries,
            uncovered,
        };

        debug!(
            "selected {} entries at {} for {} (target {}), {} px uncovered",
            plan.len(),
            selected,
            region,
            target,
            plan.uncovered_area()
        );

        if !plan.is_complete() && !self.options.allow_partial_coverage {
            return Err(Error::IncompleteCoverage {
                region: *region,
                uncovered_area: plan.uncovered_area(),
            });
        }
        Ok(plan)
    }

    /// Tiles of `level` intersecting `region`, with their intersection.
    fn candidates(&self, level: &Level, region: &Rect) -> Vec<(TileKey, Rect)> {
        let keys: Vec<TileKey> = match level.index() {
            Some(index) => index.query(*region).collect(),
            None => self
                .index
                .query(*region)
                .filter(|&k| self.tiles[k].subsampling() == level.subsampling())
                .collect(),
        };

        keys.into_iter()
            .filter_map(|k| self.tiles[k].extent().intersection(region).map(|i| (k, i)))
            .collect()
    }
}

/// Output raster of a query: one pixel per `step` block of the region,
/// anchored at the region's top-left corner.
struct OutputLattice {
    region: Rect,
    step_x: i64,
    step_y: i64,
}

impl OutputLattice {
    fn new(region: &Rect, step: Subsampling) -> Self {
        Self {
            region: *region,
            step_x: step.x as i64,
            step_y: step.y as i64,
        }
    }

    /// The whole output raster, in output pixels.
    fn output_rect(&self) -> Rect {
        self.to_output(&self.region)
    }

    /// Output pixels touched by `area`, a part of the region.
    fn to_output(&self, area: &Rect) -> Rect {
        let dx0 = area.min_x - self.region.min_x;
        let dy0 = area.min_y - self.region.min_y;
        let dx1 = area.max_x - self.region.min_x;
        let dy1 = area.max_y - self.region.min_y;
        Rect {
            min_x: dx0.div_euclid(self.step_x),
            min_y: dy0.div_euclid(self.step_y),
            max_x: -((-dx1).div_euclid(self.step_x)),
            max_y: -((-dy1).div_euclid(self.step_y)),
        }
    }

    /// Footprint of output pixels in the mosaic, clipped to the region.
    fn to_mosaic(&self, pixels: &Rect) -> Rect {
        Rect {
            min_x: self.region.min_x + pixels.min_x * self.step_x,
            min_y: self.region.min_y + pixels.min_y * self.step_y,
            max_x: (self.region.min_x + pixels.max_x * self.step_x).min(self.region.max_x),
            max_y: (self.region.min_y + pixels.max_y * self.step_y).min(self.region.max_y),
        }
    }
}

/// Parts of `area` not covered by any rectangle in `claimed`.
fn remainder(area: Rect, claimed: &[Rect]) -> Vec<Rect> {
    let mut pieces = vec![area];
    for cut in claimed {
        if pieces.is_empty() {
            break;
        }
        pieces = pieces
            .into_iter()
            .flat_map(|p| p.subtract(cut))
            .collect();
    }
    pieces
}
