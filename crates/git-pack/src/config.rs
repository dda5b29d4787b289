//! The builder's small enumerated configuration surface.
//!
//! Deliberately not a general config-file layer (loading from disk, layered
//! scopes, and so on are out of scope for this crate); just the handful of
//! integer keys the delta search and cache accounting actually consult.

use crate::PackError;

/// Default matches C git's order-of-magnitude default for the delta cache.
const DEFAULT_DELTA_CACHE_SIZE: u64 = 256 * 1024 * 1024;
/// Default matches C git's small-delta cache cutoff.
const DEFAULT_DELTA_CACHE_LIMIT: u64 = 1000;
/// Default matches C git's `core.bigFileThreshold`.
const DEFAULT_BIG_FILE_THRESHOLD: u64 = 512 * 1024 * 1024;

/// Tunables recognized by the pack builder.
///
/// `pack.deltaCacheSize` and `pack.bigFileThreshold` are deliberately two
/// separate fields here; see the crate's design notes for why the reference
/// implementation's single shared setting is not reproduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackConfig {
    /// `pack.deltaCacheSize` — global budget, in bytes, for cached deltas
    /// produced during search and consumed at write time.
    pub max_delta_cache_size: u64,
    /// `pack.deltaCacheLimit` — deltas at or above this size are only
    /// cached when the base/target are large relative to the delta.
    pub cache_max_small_delta_size: u64,
    /// `pack.windowMemory` — bytes of decompressed payload the sliding
    /// window may hold at once; 0 means unlimited.
    pub window_memory_limit: u64,
    /// `pack.bigFileThreshold` — objects at or above this size are never
    /// considered for delta search.
    pub big_file_threshold: u64,
    /// Sliding-window size `W`; the search actually allocates `W + 1` slots.
    pub window: usize,
    /// Maximum delta chain depth `D`.
    pub max_depth: usize,
    /// 0 = autodetect CPU count, 1 = force serial.
    pub worker_count: usize,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            max_delta_cache_size: DEFAULT_DELTA_CACHE_SIZE,
            cache_max_small_delta_size: DEFAULT_DELTA_CACHE_LIMIT,
            window_memory_limit: 0,
            big_file_threshold: DEFAULT_BIG_FILE_THRESHOLD,
            window: crate::DEFAULT_WINDOW,
            max_depth: crate::DEFAULT_MAX_DEPTH,
            worker_count: 1,
        }
    }
}

impl PackConfig {
    /// Validate that every field is in range, returning `PackError::Config`
    /// naming the first offender.
    pub fn validate(&self) -> Result<(), PackError> {
        if self.window == 0 {
            return Err(PackError::Config("pack.window must be >= 1".into()));
        }
        if self.max_depth == 0 {
            return Err(PackError::Config("pack.depth must be >= 1".into()));
        }
        if self.max_depth > crate::MAX_DELTA_CHAIN_DEPTH {
            return Err(PackError::Config(format!(
                "pack.depth must be <= {}",
                crate::MAX_DELTA_CHAIN_DEPTH
            )));
        }
        Ok(())
    }

    /// Resolve `worker_count == 0` ("autodetect") to the available
    /// parallelism, falling back to 1 if it cannot be determined.
    pub fn resolved_worker_count(&self) -> usize {
        if self.worker_count != 0 {
            return self.worker_count;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}
