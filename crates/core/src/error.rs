//! Error types for Mosaico

use std::time::Duration;

use thiserror::Error;

use crate::geometry::Rect;
use crate::tile::{Subsampling, TileId};

/// Main error type for mosaic construction, selection and handle management
#[derive(Error, Debug)]
pub enum Error {
    #[error("mosaic has no tiles")]
    EmptyMosaic,

    #[error("source {source_id} for tile {tile} cannot be opened: {source}")]
    SourceUnavailable {
        tile: TileId,
        source_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("region {region} is not fully covered ({uncovered_area} pixels uncovered)")]
    IncompleteCoverage { region: Rect, uncovered_area: u64 },

    #[error("mosaic is closed")]
    MosaicClosed,

    #[error("no tiles available for subsampling {target}")]
    NoTileAtResolution { target: Subsampling },

    #[error("invalid tile {id}: {reason}")]
    InvalidTile { id: TileId, reason: String },

    #[error("duplicate tile id: {0}")]
    DuplicateTileId(TileId),

    #[error("invalid region: {0}")]
    InvalidRegion(String),

    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("handle for source {source_id} is closed")]
    HandleClosed { source_id: String },

    #[error("all {max} handles stayed in use for {waited:?}")]
    HandleBudgetExhausted { max: usize, waited: Duration },

    #[error("query needs {needed} open sources but at most {max} handles may be open")]
    HandleBudgetExceeded { needed: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying the same call later can succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::SourceUnavailable { .. } | Error::HandleBudgetExhausted { .. } | Error::Io(_)
        )
    }
}

/// Result type alias for Mosaico operations
pub type Result<T> = std::result::Result<T, Error>;
