//! # Mosaico
//!
//! Spatial index and tile selection for multi-resolution raster tile mosaics.
//!
//! A [`Mosaic`] is opened once from a set of [`TileDescriptor`]s. It bulk-loads
//! a read-only spatial index over the tile extents, groups tiles into
//! resolution levels and answers queries of the form "region R at subsampling
//! S" with a [`ReadPlan`]: which tiles to read, which pixels of each, and where
//! they land in the output. [`Mosaic::query`] additionally leases handles on
//! the tiles' sources from a pool bounded by
//! [`MosaicOptions::max_open_handles`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use mosaico::{FileSource, Mosaic, Rect, Subsampling, TileDescriptor};
//!
//! # fn main() -> mosaico::Result<()> {
//! let tiles = vec![TileDescriptor::new(
//!     "overview",
//!     Rect::new(0, 0, 4096, 4096)?,
//!     Subsampling::uniform(4)?,
//!     Arc::new(FileSource::new("overview.tif")),
//! )];
//! let mosaic = Mosaic::open(tiles)?;
//! let result = mosaic.query(&Rect::new(0, 0, 1024, 1024)?, Subsampling::uniform(4)?)?;
//! for entry in &result.plan {
//!     println!("{} -> {:?}", entry.tile_id, entry.destination_offset);
//! }
//! result.release();
//! mosaic.dispose()?;
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod handles;
pub mod index;
mod maybe_rayon;
pub mod mosaic;
pub mod plan;
pub mod selector;

pub use catalog::{Level, ResolutionCatalog};
pub use handles::{DisposeReport, Handle, HandleManager, HandleStats};
pub use index::{GridIndex, IndexStats, LevelIndex, SpatialIndex, TileKey};
pub use mosaic::{Mosaic, QueryResult, TileFailure};
pub use plan::{PlanEntry, ReadPlan};
pub use selector::TileSelector;

pub use mosaico_core::{
    BBox, Error, FileSource, GeoTransform, MemorySource, MosaicOptions, PixelWindow, Rect,
    ResolutionPolicy, Result, SourceReader, Subsampling, TileDescriptor, TileId, TileSource,
};
