//! Concurrent entry store backing one memoized computation
//!
//! Entries live in a sharded `DashMap`, so lookups and insertions on
//! different keys proceed in parallel and operations on one key serialize on
//! its shard. Lookups hand out an [`EntryLease`]; an entry with outstanding
//! leases is never chosen for capacity eviction.
//!
//! Expired entries are invisible to [`EntryStore::get`] but are only removed
//! by housekeeping, which runs after every [`EntryStore::put`] and from the
//! background sweeper. Housekeeping passes serialize among themselves;
//! lookups never wait on them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::eviction::{EvictionPolicy, Recency, select_victim};
use crate::events::{CacheEvent, EventBus, EvictReason};
use crate::fingerprint::CacheKey;
use crate::stats::StatsCounters;

/// Cache entry with metadata
#[derive(Debug)]
pub struct CacheEntry<V> {
    /// The stored value
    value: Arc<V>,
    /// When the entry was inserted
    inserted_at: Instant,
    /// When the entry was last read
    last_access: Instant,
    /// Store-wide recency sequence, bumped on insert and touch
    sequence: u64,
    /// In-flight readers holding a lease
    readers: Arc<AtomicUsize>,
}

impl<V> CacheEntry<V> {
    fn new(value: Arc<V>, now: Instant, sequence: u64) -> Self {
        Self {
            value,
            inserted_at: now,
            last_access: now,
            sequence,
            readers: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn recency(&self) -> Recency {
        Recency {
            last_access: self.last_access,
            inserted_at: self.inserted_at,
            sequence: self.sequence,
        }
    }

    fn readers(&self) -> usize {
        self.readers.load(Ordering::Acquire)
    }

    fn lease(&self) -> EntryLease<V> {
        self.readers.fetch_add(1, Ordering::AcqRel);
        EntryLease {
            value: Arc::clone(&self.value),
            readers: Arc::clone(&self.readers),
        }
    }
}

/// A live reference to a stored entry
///
/// While any lease is alive the entry is skipped by capacity eviction.
#[derive(Debug)]
pub struct EntryLease<V> {
    value: Arc<V>,
    readers: Arc<AtomicUsize>,
}

impl<V> EntryLease<V> {
    /// The stored value
    #[must_use]
    pub fn value(&self) -> &Arc<V> {
        &self.value
    }
}

impl<V> Drop for EntryLease<V> {
    fn drop(&mut self) {
        self.readers.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Bounded mapping from [`CacheKey`] to cached values
pub struct EntryStore<V> {
    computation: Arc<str>,
    entries: DashMap<CacheKey, CacheEntry<V>>,
    policy: EvictionPolicy,
    sequence: AtomicU64,
    housekeeping: Mutex<()>,
    events: Arc<EventBus>,
    stats: Arc<StatsCounters>,
}

impl<V> EntryStore<V> {
    /// Create an empty store for `computation`
    #[must_use]
    pub fn new(computation: &str, policy: EvictionPolicy, events: Arc<EventBus>) -> Self {
        Self::with_stats(computation, policy, events, Arc::default())
    }

    pub(crate) fn with_stats(
        computation: &str,
        policy: EvictionPolicy,
        events: Arc<EventBus>,
        stats: Arc<StatsCounters>,
    ) -> Self {
        let capacity = policy.max_entries().map_or(0, |max| max.saturating_add(1).min(4096));
        Self {
            computation: Arc::from(computation),
            entries: DashMap::with_capacity(capacity),
            policy,
            sequence: AtomicU64::new(0),
            housekeeping: Mutex::new(()),
            events,
            stats,
        }
    }

    /// Expiry and eviction limits
    #[must_use]
    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }

    /// Look up a live entry; expired entries read as absent
    pub fn get(&self, key: &CacheKey, now: Instant) -> Option<EntryLease<V>> {
        let entry = self.entries.get(key)?;
        if self.policy.is_expired(entry.inserted_at, now) {
            tracing::trace!(computation = %self.computation, key = %key, "Entry expired on lookup");
            return None;
        }
        Some(entry.lease())
    }

    /// Insert or replace an entry, then run one housekeeping pass
    pub fn put(&self, key: CacheKey, value: Arc<V>, now: Instant) {
        let sequence = self.next_sequence();
        let replaced = self.entries.insert(key, CacheEntry::new(value, now, sequence));

        if let Some(old) = replaced
            && self.policy.is_expired(old.inserted_at, now)
        {
            self.stats.record_expirations(1);
            self.events.emit(CacheEvent::Expire {
                computation: self.computation.to_string(),
                key,
            });
        }

        self.housekeep(now);
    }

    /// Mark an entry as used at `now` without changing its value
    pub fn touch(&self, key: &CacheKey, now: Instant) {
        let sequence = self.next_sequence();
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.last_access = now;
            entry.sequence = sequence;
        }
    }

    /// Remove an entry; returns whether it was present
    pub fn remove(&self, key: &CacheKey) -> bool {
        if self.entries.remove(key).is_some() {
            self.record_eviction(*key, EvictReason::Removed);
            true
        } else {
            false
        }
    }

    /// Number of stored entries, including expired ones not yet purged
    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a live entry exists, without touching it
    #[must_use]
    pub fn contains(&self, key: &CacheKey, now: Instant) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| !self.policy.is_expired(entry.inserted_at, now))
    }

    /// Keys currently stored
    #[must_use]
    pub fn keys(&self) -> Vec<CacheKey> {
        self.entries.iter().map(|entry| *entry.key()).collect()
    }

    /// Remove every entry; returns how many were removed
    pub fn clear(&self) -> usize {
        let _pass = self.housekeeping.lock();
        let mut removed = 0;
        for key in self.keys() {
            if self.entries.remove(&key).is_some() {
                self.record_eviction(key, EvictReason::Cleared);
                removed += 1;
            }
        }
        removed
    }

    /// Remove every expired entry; returns how many were removed
    pub fn purge_expired(&self, now: Instant) -> usize {
        let _pass = self.housekeeping.lock();
        self.purge_expired_locked(now)
    }

    /// Purge expired entries, then evict down to the entry bound
    fn housekeep(&self, now: Instant) {
        let _pass = self.housekeeping.lock();
        self.purge_expired_locked(now);
        self.enforce_capacity_locked();
    }

    fn purge_expired_locked(&self, now: Instant) -> usize {
        if self.policy.ttl().is_none() {
            return 0;
        }

        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|entry| self.policy.is_expired(entry.inserted_at, now))
            .map(|entry| *entry.key())
            .collect();

        let mut purged = 0;
        for key in expired {
            let removed = self
                .entries
                .remove_if(&key, |_, entry| self.policy.is_expired(entry.inserted_at, now));
            if removed.is_some() {
                purged += 1;
                tracing::trace!(computation = %self.computation, key = %key, "Purged expired entry");
                self.events.emit(CacheEvent::Expire {
                    computation: self.computation.to_string(),
                    key,
                });
            }
        }

        if purged > 0 {
            self.stats.record_expirations(purged as u64);
        }
        purged
    }

    fn enforce_capacity_locked(&self) -> usize {
        let mut evicted = 0;
        while self.policy.is_over_capacity(self.entries.len()) {
            let victim = select_victim(
                self.entries
                    .iter()
                    .map(|entry| (*entry.key(), entry.recency(), entry.readers())),
            );

            let Some(key) = victim else {
                tracing::warn!(
                    computation = %self.computation,
                    size = self.entries.len(),
                    max_entries = ?self.policy.max_entries(),
                    "Every entry is held by a reader; store temporarily over capacity"
                );
                break;
            };

            // A reader may have leased the victim since it was selected.
            if self.entries.remove_if(&key, |_, entry| entry.readers() == 0).is_some() {
                evicted += 1;
                tracing::debug!(computation = %self.computation, key = %key, "Evicted least recently used entry");
                self.record_eviction(key, EvictReason::Capacity);
            }
        }
        evicted
    }

    fn record_eviction(&self, key: CacheKey, reason: EvictReason) {
        self.stats.record_evictions(1);
        self.events.emit(CacheEvent::Evict {
            computation: self.computation.to_string(),
            key,
            reason,
        });
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::digest::Digest;

    fn key(n: u64) -> CacheKey {
        CacheKey::from_digest(Digest::of("store-test", &n.to_le_bytes()))
    }

    fn store(ttl: Option<Duration>, max: Option<usize>) -> (EntryStore<u64>, Arc<EventBus>) {
        let events = Arc::new(EventBus::new(64));
        let store = EntryStore::new("square", EvictionPolicy::new(ttl, max), Arc::clone(&events));
        (store, events)
    }

    #[test]
    fn test_put_get_remove() {
        let (store, _) = store(None, None);
        let now = Instant::now();

        store.put(key(1), Arc::new(1), now);
        assert_eq!(store.get(&key(1), now).map(|l| **l.value()), Some(1));
        assert!(store.remove(&key(1)));
        assert!(!store.remove(&key(1)));
        assert!(store.get(&key(1), now).is_none());
    }

    #[test]
    fn test_expired_entry_reads_absent_until_purged() {
        let (store, events) = store(Some(Duration::from_secs(5)), None);
        let mut rx = events.subscribe();
        let t0 = Instant::now();

        store.put(key(1), Arc::new(1), t0);
        assert!(store.get(&key(1), t0 + Duration::from_secs(4)).is_some());
        assert!(store.get(&key(1), t0 + Duration::from_secs(5)).is_none());
        // Lazily removed: still physically present
        assert_eq!(store.size(), 1);

        assert_eq!(store.purge_expired(t0 + Duration::from_secs(5)), 1);
        assert_eq!(store.size(), 0);
        assert!(matches!(rx.try_recv(), Ok(CacheEvent::Expire { .. })));
    }

    #[test]
    fn test_lru_eviction_respects_touch() {
        let (store, _) = store(None, Some(2));
        let now = Instant::now();

        store.put(key(1), Arc::new(1), now);
        store.put(key(2), Arc::new(2), now);
        store.touch(&key(1), now);
        store.put(key(3), Arc::new(3), now);

        assert_eq!(store.size(), 2);
        assert!(store.contains(&key(1), now));
        assert!(!store.contains(&key(2), now));
        assert!(store.contains(&key(3), now));
    }

    #[test]
    fn test_leased_entry_survives_eviction() {
        let (store, _) = store(None, Some(1));
        let now = Instant::now();

        store.put(key(1), Arc::new(1), now);
        let lease = store.get(&key(1), now).unwrap();

        store.put(key(2), Arc::new(2), now);
        // key(1) is leased, so the newer key(2) is the only evictable one
        assert_eq!(store.size(), 1);
        assert!(store.contains(&key(1), now));
        drop(lease);

        store.put(key(3), Arc::new(3), now);
        assert_eq!(store.size(), 1);
        assert!(store.contains(&key(3), now));
    }

    #[test]
    fn test_newest_entry_evicted_when_older_ones_are_leased() {
        let (store, _) = store(None, Some(1));
        let now = Instant::now();

        store.put(key(1), Arc::new(1), now);
        let _first = store.get(&key(1), now).unwrap();
        store.put(key(2), Arc::new(2), now);

        assert_eq!(store.size(), 1);
        assert!(store.get(&key(2), now).is_none());
        assert!(store.contains(&key(1), now));
    }

    #[test]
    fn test_clear_reports_evictions() {
        let (store, events) = store(None, None);
        let mut rx = events.subscribe();
        let now = Instant::now();

        store.put(key(1), Arc::new(1), now);
        store.put(key(2), Arc::new(2), now);
        assert_eq!(store.clear(), 2);
        assert!(store.is_empty());

        let mut cleared = 0;
        while let Ok(event) = rx.try_recv() {
            if let CacheEvent::Evict { reason: EvictReason::Cleared, .. } = event {
                cleared += 1;
            }
        }
        assert_eq!(cleared, 2);
    }

    #[test]
    fn test_replacing_expired_entry_emits_expire() {
        let (store, events) = store(Some(Duration::from_secs(1)), None);
        let mut rx = events.subscribe();
        let t0 = Instant::now();

        store.put(key(1), Arc::new(1), t0);
        store.put(key(1), Arc::new(2), t0 + Duration::from_secs(2));

        assert!(matches!(rx.try_recv(), Ok(CacheEvent::Expire { .. })));
        assert_eq!(store.get(&key(1), t0 + Duration::from_secs(2)).map(|l| **l.value()), Some(2));
    }
}
