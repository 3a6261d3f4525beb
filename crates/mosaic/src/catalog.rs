//! Resolution catalog: tiles grouped by subsampling factor.

use std::collections::BTreeMap;

use mosaico_core::{Error, MosaicOptions, ResolutionPolicy, Result, Subsampling, TileDescriptor};
use tracing::debug;

use crate::index::{LevelIndex, TileKey};

/// All tiles sharing one subsampling factor.
#[derive(Debug, Clone)]
pub struct Level {
    subsampling: Subsampling,
    tiles: Vec<TileKey>,
    index: Option<LevelIndex>,
}

impl Level {
    pub fn subsampling(&self) -> Subsampling {
        self.subsampling
    }

    /// Keys of the level's tiles, ascending.
    pub fn tiles(&self) -> &[TileKey] {
        &self.tiles
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// The level's own sub-index, when the catalog keeps one.
    pub fn index(&self) -> Option<&LevelIndex> {
        self.index.as_ref()
    }
}

/// Resolution levels ordered from finest to coarsest. Every tile belongs to
/// exactly one level and no level is empty.
#[derive(Debug, Clone)]
pub struct ResolutionCatalog {
    levels: Vec<Level>,
    anisotropic: bool,
}

impl ResolutionCatalog {
    /// Group `tiles` by subsampling, optionally building a sub-index per level.
    pub fn build(tiles: &[TileDescriptor], options: &MosaicOptions) -> Result<Self> {
        let mut buckets: BTreeMap<Subsampling, Vec<TileKey>> = BTreeMap::new();
        for (key, tile) in tiles.iter().enumerate() {
            buckets.entry(tile.subsampling()).or_default().push(key);
        }

        let mut levels = Vec::with_capacity(buckets.len());
        for (subsampling, keys) in buckets {
            let index = if options.per_level_index {
                let items = keys.iter().map(|&k| (k, *tiles[k].extent())).collect();
                Some(LevelIndex::build(
                    items,
                    options.leaf_fanout,
                    options.internal_fanout,
                    options.grid_fast_path,
                )?)
            } else {
                None
            };

            debug!(
                "level {}: {} tiles{}",
                subsampling,
                keys.len(),
                if index.as_ref().is_some_and(LevelIndex::is_grid) { " (grid)" } else { "" }
            );
            levels.push(Level {
                subsampling,
                tiles: keys,
                index,
            });
        }

        let anisotropic = levels.iter().any(|l| !l.subsampling.is_uniform());
        Ok(Self { levels, anisotropic })
    }

    /// Levels, finest first.
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn level(&self, subsampling: Subsampling) -> Option<&Level> {
        self.levels
            .binary_search_by(|l| l.subsampling.cmp(&subsampling))
            .ok()
            .map(|i| &self.levels[i])
    }

    /// Whether any level decimates its axes differently.
    pub fn is_anisotropic(&self) -> bool {
        self.anisotropic
    }

    /// Pick the level serving a request at `target`.
    pub fn select_level(&self, target: Subsampling, policy: ResolutionPolicy) -> Result<&Level> {
        let finest = self
            .levels
            .first()
            .ok_or(Error::NoTileAtResolution { target })?;

        let chosen = match policy {
            ResolutionPolicy::NearestCoarser => self
                .levels
                .iter()
                .find(|l| l.subsampling.at_least(&target))
                .unwrap_or_else(|| self.closest_when_all_finer(target)),
            ResolutionPolicy::NearestFiner => self
                .levels
                .iter()
                .rev()
                .find(|l| l.subsampling.at_most(&target))
                .unwrap_or(finest),
        };
        Ok(chosen)
    }

    /// Fallback when no level is at least as coarse as `target` on both axes.
    fn closest_when_all_finer(&self, target: Subsampling) -> &Level {
        let wanted = if self.anisotropic {
            // Clamp each axis to the factors that exist on that axis
            let axis = |want: u32, factor: fn(&Subsampling) -> u32| {
                let mut available: Vec<u32> = self.levels.iter().map(|l| factor(&l.subsampling)).collect();
                available.sort_unstable();
                available
                    .iter()
                    .copied()
                    .find(|&f| f >= want)
                    .or_else(|| available.last().copied())
                    .unwrap_or(want)
            };
            (axis(target.x, |s| s.x), axis(target.y, |s| s.y))
        } else {
            let uniform = target.x.max(target.y);
            (uniform, uniform)
        };

        let distance = |s: &Subsampling| {
            log_ratio(s.x, wanted.0) + log_ratio(s.y, wanted.1)
        };

        // `min_by` keeps the first minimum, so ties go to the finer level
        self.levels
            .iter()
            .min_by(|a, b| distance(&a.subsampling).total_cmp(&distance(&b.subsampling)))
            .unwrap_or(&self.levels[0])
    }
}

fn log_ratio(have: u32, want: u32) -> f64 {
    ((have as f64) / (want as f64)).log2().abs()
}
