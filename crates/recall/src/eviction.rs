//! Expiry and eviction policy
//!
//! Expiry is by age since insertion (`now - inserted_at >= ttl`), checked
//! lazily on lookup and during housekeeping. Count-based eviction removes the
//! least recently used entry that no reader currently holds.

use std::time::{Duration, Instant};

/// Time-to-live and entry bound for one store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EvictionPolicy {
    ttl: Option<Duration>,
    max_entries: Option<usize>,
}

impl EvictionPolicy {
    /// Create a policy; `None` disables the respective limit
    #[must_use]
    pub fn new(ttl: Option<Duration>, max_entries: Option<usize>) -> Self {
        Self { ttl, max_entries }
    }

    /// Configured time-to-live
    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Configured entry bound
    #[must_use]
    pub fn max_entries(&self) -> Option<usize> {
        self.max_entries
    }

    /// Whether an entry inserted at `inserted_at` has expired at `now`
    #[inline]
    #[must_use]
    pub fn is_expired(&self, inserted_at: Instant, now: Instant) -> bool {
        self.ttl
            .is_some_and(|ttl| now.saturating_duration_since(inserted_at) >= ttl)
    }

    /// Whether a store of `len` entries is over its bound
    #[inline]
    #[must_use]
    pub fn is_over_capacity(&self, len: usize) -> bool {
        self.max_entries.is_some_and(|max| len > max)
    }
}

/// Recency ordering of an entry; smaller is older
///
/// Compares last access first, then insertion time, then a per-store
/// sequence number so entries stamped with the same instant still have a
/// total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Recency {
    pub(crate) last_access: Instant,
    pub(crate) inserted_at: Instant,
    pub(crate) sequence: u64,
}

/// Pick the least recently used candidate that has no active readers
pub fn select_victim<K, I>(candidates: I) -> Option<K>
where
    I: IntoIterator<Item = (K, Recency, usize)>,
{
    candidates
        .into_iter()
        .filter(|(_, _, readers)| *readers == 0)
        .min_by_key(|(_, recency, _)| *recency)
        .map(|(key, _, _)| key)
}
