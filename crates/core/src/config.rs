//! Mosaic options

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How the selector picks a resolution level for a target subsampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPolicy {
    /// Finest level at least as coarse as the target. Never reads finer data than
    /// requested unless the target is coarser than every level.
    #[default]
    NearestCoarser,
    /// Coarsest level at least as fine as the target, as overview pickers for
    /// display usually do.
    NearestFiner,
}

/// Options for building and querying a mosaic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MosaicOptions {
    /// Maximum number of concurrently open source handles (default: 64).
    pub max_open_handles: usize,
    /// Tiles per tree leaf (default: 8).
    pub leaf_fanout: usize,
    /// Children per internal tree node (default: 8).
    pub internal_fanout: usize,
    /// Return partial plans for regions with gaps instead of failing (default: true).
    pub allow_partial_coverage: bool,
    /// How long an acquisition waits for a handle to become evictable (default: 30 s).
    #[serde(with = "duration_millis")]
    pub acquire_timeout: Duration,
    /// Level selection policy (default: [`ResolutionPolicy::NearestCoarser`]).
    pub resolution_policy: ResolutionPolicy,
    /// Keep a sub-index per resolution level instead of filtering the global index (default: true).
    pub per_level_index: bool,
    /// Use a cell grid for levels made of equal, aligned tiles (default: true).
    pub grid_fast_path: bool,
}

impl Default for MosaicOptions {
    fn default() -> Self {
        Self {
            max_open_handles: 64,
            leaf_fanout: 8,
            internal_fanout: 8,
            allow_partial_coverage: true,
            acquire_timeout: Duration::from_secs(30),
            resolution_policy: ResolutionPolicy::NearestCoarser,
            per_level_index: true,
            grid_fast_path: true,
        }
    }
}

/// Bounds for both tree fan-outs.
pub const FANOUT_RANGE: std::ops::RangeInclusive<usize> = 2..=64;

impl MosaicOptions {
    pub fn with_max_open_handles(mut self, n: usize) -> Self {
        self.max_open_handles = n;
        self
    }

    pub fn with_fanout(mut self, leaf: usize, internal: usize) -> Self {
        self.leaf_fanout = leaf;
        self.internal_fanout = internal;
        self
    }

    pub fn with_partial_coverage(mut self, allow: bool) -> Self {
        self.allow_partial_coverage = allow;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_resolution_policy(mut self, policy: ResolutionPolicy) -> Self {
        self.resolution_policy = policy;
        self
    }

    pub fn with_per_level_index(mut self, enabled: bool) -> Self {
        self.per_level_index = enabled;
        self
    }

    pub fn with_grid_fast_path(mut self, enabled: bool) -> Self {
        self.grid_fast_path = enabled;
        self
    }

    /// Reject out-of-range values.
    pub fn validate(&self) -> Result<()> {
        if self.max_open_handles == 0 {
            return Err(Error::InvalidParameter {
                name: "maxOpenHandles",
                value: self.max_open_handles.to_string(),
                reason: "must be positive".into(),
            });
        }
        if !FANOUT_RANGE.contains(&self.leaf_fanout) {
            return Err(Error::InvalidParameter {
                name: "leafFanout",
                value: self.leaf_fanout.to_string(),
                reason: format!("must be within {FANOUT_RANGE:?}"),
            });
        }
        if !FANOUT_RANGE.contains(&self.internal_fanout) {
            return Err(Error::InvalidParameter {
                name: "internalFanout",
                value: self.internal_fanout.to_string(),
                reason: format!("must be within {FANOUT_RANGE:?}"),
            });
        }
        Ok(())
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
