//! Per-computation hit/miss/eviction accounting

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters updated on the invoke path
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    errors: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A waiter served by another caller's in-flight computation
    pub(crate) fn record_coalesced(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, size: usize, max_entries: Option<usize>) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            size,
            max_entries,
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Cache statistics for one computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Calls answered without running the computation (includes coalesced)
    pub hits: u64,
    /// Calls that ran the computation
    pub misses: u64,
    /// Calls that waited on another caller's in-flight computation
    pub coalesced: u64,
    /// Current number of stored entries
    pub size: usize,
    /// Configured maximum entry count
    pub max_entries: Option<usize>,
    /// Entries removed by capacity, explicit removal or clear
    pub evictions: u64,
    /// Entries removed because their time-to-live elapsed
    pub expirations: u64,
    /// Failed calls
    pub errors: u64,
}

impl CacheStats {
    /// Hit rate (0.0-1.0); 0.0 before the first call
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Total number of calls observed
    #[must_use]
    pub fn total_calls(&self) -> u64 {
        self.hits + self.misses
    }

    /// Whether the store sits at (or above) its entry bound
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.max_entries.is_some_and(|max| self.size >= max)
    }
}
