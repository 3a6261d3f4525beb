//! The mosaic façade: construction, queries and disposal.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use mosaico_core::{
    BBox, Error, GeoTransform, MosaicOptions, Rect, Result, Subsampling, TileDescriptor, TileId,
};
use tracing::{debug, warn};

use crate::catalog::{Level, ResolutionCatalog};
use crate::handles::{DisposeReport, Handle, HandleManager, HandleStats};
use crate::index::{IndexStats, SpatialIndex, TileKey};
use crate::maybe_rayon::*;
use crate::plan::ReadPlan;
use crate::selector::TileSelector;

/// A tile whose source could not be opened during a query.
#[derive(Debug)]
pub struct TileFailure {
    pub tile: TileId,
    pub error: Error,
}

/// Answer to [`Mosaic::query`]: the plan and one handle per distinct tile.
///
/// Entries of tiles listed in `failed` stay in the plan; callers decide whether
/// to render around them.
#[derive(Debug)]
pub struct QueryResult {
    pub plan: ReadPlan,
    /// Handles in first-use order of their tiles in the plan.
    pub handles: Vec<Handle>,
    pub failed: Vec<TileFailure>,
}

impl QueryResult {
    pub fn handle_for(&self, tile: &TileId) -> Option<&Handle> {
        self.handles.iter().find(|h| h.tile_id() == tile)
    }

    /// Whether every tile of the plan got a handle.
    pub fn is_fully_open(&self) -> bool {
        self.failed.is_empty()
    }

    /// Release every handle.
    pub fn release(self) {
        for handle in self.handles {
            handle.release();
        }
    }
}

/// An immutable set of tiles with their indexes and a bounded handle pool.
///
/// Indexes are read-only after [`Mosaic::open`], so a mosaic can be queried
/// from many threads at once. After [`Mosaic::dispose`] every query fails with
/// [`Error::MosaicClosed`].
#[derive(Debug)]
pub struct Mosaic {
    tiles: Vec<TileDescriptor>,
    by_id: HashMap<TileId, TileKey>,
    index: SpatialIndex,
    catalog: ResolutionCatalog,
    handles: HandleManager,
    options: MosaicOptions,
    geo_transform: Option<GeoTransform>,
    closed: AtomicBool,
}

impl Mosaic {
    /// Open a mosaic with default options.
    pub fn open(tiles: Vec<TileDescriptor>) -> Result<Self> {
        Self::open_with(tiles, MosaicOptions::default())
    }

    /// Validate `tiles`, bulk-load the spatial index and group tiles by resolution.
    pub fn open_with(tiles: Vec<TileDescriptor>, options: MosaicOptions) -> Result<Self> {
        options.validate()?;
        if tiles.is_empty() {
            return Err(Error::EmptyMosaic);
        }

        let mut by_id = HashMap::with_capacity(tiles.len());
        for (key, tile) in tiles.iter().enumerate() {
            tile.validate()?;
            if by_id.insert(tile.id().clone(), key).is_some() {
                return Err(Error::DuplicateTileId(tile.id().clone()));
            }
        }

        let index = SpatialIndex::build(
            tiles.iter().enumerate().map(|(k, t)| (k, *t.extent())),
            options.leaf_fanout,
            options.internal_fanout,
        )?;
        let catalog = ResolutionCatalog::build(&tiles, &options)?;
        let handles = HandleManager::new(options.max_open_handles, options.acquire_timeout);

        debug!(
            "opened mosaic: {} tiles, {} levels, index depth {}, bounds {}",
            tiles.len(),
            catalog.levels().len(),
            index.depth(),
            index.bounds()
        );

        Ok(Self {
            tiles,
            by_id,
            index,
            catalog,
            handles,
            options,
            geo_transform: None,
            closed: AtomicBool::new(false),
        })
    }

    /// Attach the affine transform from finest-resolution pixels to map
    /// coordinates, enabling [`Mosaic::query_bbox`].
    pub fn with_geo_transform(mut self, transform: GeoTransform) -> Self {
        self.geo_transform = Some(transform);
        self
    }

    pub fn geo_transform(&self) -> Option<&GeoTransform> {
        self.geo_transform.as_ref()
    }

    pub fn options(&self) -> &MosaicOptions {
        &self.options
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::MosaicClosed)
        } else {
            Ok(())
        }
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn tiles(&self) -> &[TileDescriptor] {
        &self.tiles
    }

    pub fn tile(&self, id: &TileId) -> Option<&TileDescriptor> {
        self.by_id.get(id).map(|&k| &self.tiles[k])
    }

    /// Bounding rectangle of every tile.
    pub fn bounds(&self) -> Rect {
        self.index.bounds()
    }

    /// Resolution levels, finest first.
    pub fn levels(&self) -> &[Level] {
        self.catalog.levels()
    }

    pub fn index_stats(&self) -> IndexStats {
        self.index.stats()
    }

    /// Tiles of every level whose extent intersects `region`, in index order.
    pub fn tiles_in(&self, region: &Rect) -> Result<Vec<&TileDescriptor>> {
        self.ensure_open()?;
        Ok(self.index.query(*region).map(|k| &self.tiles[k]).collect())
    }

    /// Compute the read plan for `region` without opening anything.
    pub fn plan(&self, region: &Rect, target: Subsampling) -> Result<ReadPlan> {
        self.ensure_open()?;
        self.selector().select(region, target)
    }

    /// Plan several regions, in parallel with the `parallel` feature.
    pub fn query_many(&self, regions: &[Rect], target: Subsampling) -> Result<Vec<Result<ReadPlan>>> {
        self.ensure_open()?;
        let selector = self.selector();
        Ok(regions
            .into_par_iter()
            .map(|region| selector.select(region, target))
            .collect())
    }

    /// Plan `region` and acquire a handle for every tile the plan reads.
    ///
    /// Tiles whose source cannot be opened are reported in
    /// [`QueryResult::failed`]. When the plan reads more sources than the handle
    /// budget, the first sources in plan order are leased and tiles of the rest
    /// are reported with [`Error::HandleBudgetExceeded`]. The whole query fails
    /// only when the budget stayed in use by other callers past the acquire
    /// timeout.
    pub fn query(&self, region: &Rect, target: Subsampling) -> Result<QueryResult> {
        let plan = self.plan(region, target)?;
        let tiles: Vec<TileDescriptor> = plan
            .tile_ids()
            .into_iter()
            .filter_map(|id| self.tile(id))
            .cloned()
            .collect();

        let max = self.handles.max_open();
        let (leased, over_budget) = split_at_budget(tiles, max);
        let mut failed = Vec::new();
        if !over_budget.is_empty() {
            let needed = distinct_sources(&leased) + distinct_sources(&over_budget);
            warn!(
                "plan for {} reads {} sources, budget is {}; {} tiles left unopened",
                region,
                needed,
                max,
                over_budget.len()
            );
            failed.extend(over_budget.into_iter().map(|tile| TileFailure {
                tile: tile.id().clone(),
                error: Error::HandleBudgetExceeded { needed, max },
            }));
        }

        let mut handles = Vec::with_capacity(leased.len());
        for (tile, result) in self.handles.acquire_many(&leased)? {
            match result {
                Ok(handle) => handles.push(handle),
                Err(e @ Error::HandleBudgetExhausted { .. }) | Err(e @ Error::MosaicClosed) => {
                    for handle in handles {
                        Handle::release(handle);
                    }
                    return Err(e);
                }
                Err(error) => {
                    warn!("tile {} unavailable: {}", tile, error);
                    failed.push(TileFailure { tile, error });
                }
            }
        }

        Ok(QueryResult {
            plan,
            handles,
            failed,
        })
    }

    /// Lease a handle on the source of the tile named `id`.
    pub fn acquire(&self, id: &TileId) -> Result<Handle> {
        self.ensure_open()?;
        let tile = self.tile(id).ok_or_else(|| Error::InvalidParameter {
            name: "tileId",
            value: id.to_string(),
            reason: "no such tile in the mosaic".into(),
        })?;
        self.handles.acquire(tile)
    }

    /// [`Mosaic::query`] for a bounding box in map coordinates.
    ///
    /// The box is mapped through the geotransform and rounded outward to whole
    /// pixels.
    pub fn query_bbox(&self, bbox: &BBox, target: Subsampling) -> Result<QueryResult> {
        self.ensure_open()?;
        let transform = self.geo_transform.as_ref().ok_or_else(|| Error::InvalidParameter {
            name: "geoTransform",
            value: "none".into(),
            reason: "bounding-box queries need a geotransform".into(),
        })?;
        let region = transform.bbox_to_pixels(bbox)?;
        self.query(&region, target)
    }

    /// Give a handle back.
    ///
    /// The handle is released either way; on a disposed mosaic the call still
    /// reports [`Error::MosaicClosed`].
    pub fn release(&self, handle: Handle) -> Result<()> {
        self.handles.release(handle);
        self.ensure_open()
    }

    pub fn handle_stats(&self) -> HandleStats {
        self.handles.stats()
    }

    /// Close every handle and refuse further queries.
    ///
    /// Close failures are collected in the report. A second call fails with
    /// [`Error::MosaicClosed`] and closes nothing. Index memory is freed when
    /// the mosaic is dropped.
    pub fn dispose(&self) -> Result<DisposeReport> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::MosaicClosed);
        }
        let report = self.handles.dispose()?;
        if !report.is_clean() {
            warn!("{} handles failed to close", report.failures.len());
        }
        Ok(report)
    }

    fn selector(&self) -> TileSelector<'_> {
        TileSelector::new(&self.tiles, &self.index, &self.catalog, &self.options)
    }
}

/// Partition `tiles` into those reading one of the first `max` distinct sources
/// in order, and the rest.
fn split_at_budget(tiles: Vec<TileDescriptor>, max: usize) -> (Vec<TileDescriptor>, Vec<TileDescriptor>) {
    let mut admitted: HashSet<String> = HashSet::new();
    tiles.into_iter().partition(|tile| {
        let id = tile.source_id();
        admitted.contains(id) || (admitted.len() < max && admitted.insert(id.to_string()))
    })
}

fn distinct_sources(tiles: &[TileDescriptor]) -> usize {
    tiles.iter().map(TileDescriptor::source_id).collect::<HashSet<_>>().len()
}
