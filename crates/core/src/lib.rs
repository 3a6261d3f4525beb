//! # Mosaico Core
//!
//! Core types shared by the Mosaico tile-mosaic engine.
//!
//! This crate provides:
//! - `Rect`, `PixelWindow`: integer geometry of the mosaic pixel space
//! - `GeoTransform`, `BBox`: affine georeferencing of that space
//! - `TileDescriptor`: one immutable tile (extent, subsampling, source)
//! - `TileSource` / `SourceReader`: the capability used to open tile data
//! - `MosaicOptions`: build and query options
//! - `Error`: the error taxonomy of the engine

pub mod config;
pub mod error;
pub mod geometry;
pub mod source;
pub mod tile;

pub use config::{MosaicOptions, ResolutionPolicy};
pub use error::{Error, Result};
pub use geometry::{BBox, GeoTransform, PixelWindow, Rect};
pub use source::{FileSource, MemorySource, SourceReader, TileSource};
pub use tile::{Subsampling, TileDescriptor, TileId};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{MosaicOptions, ResolutionPolicy};
    pub use crate::error::{Error, Result};
    pub use crate::geometry::{BBox, GeoTransform, PixelWindow, Rect};
    pub use crate::source::{SourceReader, TileSource};
    pub use crate::tile::{Subsampling, TileDescriptor, TileId};
}
