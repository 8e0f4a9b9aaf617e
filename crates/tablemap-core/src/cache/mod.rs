//! Result and command-text caches.
//!
//! - [`ResultCache`] memoizes materialized query results by key with a
//!   per-entry expiration. It is never a source of truth: a miss is always
//!   safe to recompute by running the query again.
//! - [`CommandCache`] memoizes generated SQL text by expression shape, so a
//!   repeated query only rebinds its values.

mod command_cache;
mod result_cache;

use std::sync::atomic::{AtomicU64, Ordering};

pub use command_cache::{CachedCommand, CommandCache, CommandKey};
pub use result_cache::{CacheEntry, ResultCache};

/// Cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    /// Get hit count.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get miss count.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get eviction count.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Calculate hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }
}
