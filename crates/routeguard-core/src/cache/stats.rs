//! Per-cache atomic counters.
//!
//! Counters are incremented silently at the call site. Call
//! [`CacheStats::flush`] to emit the current values as a single
//! `tracing::info!` event (e.g. at the end of a run).

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Lightweight atomic counters owned by one `CompilationCache`.
///
/// `hits` always equals `sync_hits + async_hits`; async hits are derived.
#[derive(Debug)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sync_hits: AtomicU64,
    errors: AtomicU64,
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStats {
    pub const fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sync_hits: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// A lookup answered from an already-settled entry.
    pub(crate) fn record_sync_hit(&self) {
        self.sync_hits.fetch_add(1, Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// A lookup that found an in-flight compile.
    pub(crate) fn record_async_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cache_errors", "counter incremented");
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn sync_hits(&self) -> u64 {
        self.sync_hits.load(Ordering::Relaxed)
    }

    pub fn async_hits(&self) -> u64 {
        self.hits().saturating_sub(self.sync_hits())
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Copy the counters into a serializable snapshot.
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        let sync_hits = self.sync_hits();
        let hits = self.hits().max(sync_hits);
        CacheStatsSnapshot {
            hits,
            misses: self.misses(),
            sync_hits,
            async_hits: hits - sync_hits,
            errors: self.errors(),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        let snap = self.snapshot();
        tracing::info!(
            event = "cache.stats",
            hits = snap.hits,
            misses = snap.misses,
            sync_hits = snap.sync_hits,
            async_hits = snap.async_hits,
            errors = snap.errors,
        );
    }

    /// Reset all counters to zero (start of a run, or in tests).
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.sync_hits.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time view of [`CacheStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sync_hits: u64,
    pub async_hits: u64,
    pub errors: u64,
}

impl CacheStatsSnapshot {
    /// Fraction of lookups served without starting a compile.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
