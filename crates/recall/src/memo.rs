//! Invocation coordinator
//!
//! A [`Memoized`] handle wraps one registered computation. Each call is
//! fingerprinted, answered from the entry store when a live entry exists, and
//! otherwise computed once per key no matter how many callers ask
//! concurrently.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::MemoConfig;
use crate::error::{BoxError, CacheError, CacheResult};
use crate::events::CacheEvent;
use crate::fingerprint::{CacheKey, ComputationId, fingerprint};
use crate::flight::{Claim, FlightGuard, FlightTable, Outcome};
use crate::guard::{MutationGuard, MutationMode};
use crate::inputs::Inputs;
use crate::policy::{HashPolicy, PolicyScope};
use crate::registry::Context;
use crate::stats::{CacheStats, StatsCounters};
use crate::store::EntryStore;

/// Type-erased wrapped computation
pub(crate) type ComputeFn<V> = Arc<dyn Fn(&Inputs) -> Result<V, BoxError> + Send + Sync>;

/// Administrative view of a registered computation
pub(crate) trait Administered: Send + Sync {
    fn clear(&self) -> usize;
    fn stats(&self) -> CacheStats;
    fn purge_expired(&self) -> usize;
}

pub(crate) struct MemoInner<V> {
    id: ComputationId,
    store: EntryStore<V>,
    guard: MutationGuard<V>,
    compute: ComputeFn<V>,
    local_policy: HashPolicy,
    flights: FlightTable<V>,
    stats: Arc<StatsCounters>,
    context: Arc<Context>,
    suppress_notices: bool,
    miss_noticed: AtomicBool,
    hit_noticed: AtomicBool,
}

impl<V: Send + Sync + 'static> MemoInner<V> {
    pub(crate) fn new(
        id: ComputationId,
        config: MemoConfig,
        guard: MutationGuard<V>,
        compute: ComputeFn<V>,
        context: Arc<Context>,
    ) -> Self {
        let stats = Arc::new(StatsCounters::default());
        let store = EntryStore::with_stats(
            id.name(),
            config.eviction_policy(),
            Arc::clone(&context.events),
            Arc::clone(&stats),
        );
        Self {
            id,
            store,
            guard,
            compute,
            local_policy: config.hash_policy,
            flights: FlightTable::new(),
            stats,
            context,
            suppress_notices: config.suppress_duplicate_notices,
            miss_noticed: AtomicBool::new(false),
            hit_noticed: AtomicBool::new(false),
        }
    }

    fn name(&self) -> &str {
        self.id.name()
    }

    fn key_for(&self, inputs: &Inputs) -> CacheResult<CacheKey> {
        let global = self.context.global_policy.read();
        fingerprint(&self.id, inputs, PolicyScope::layered(&self.local_policy, &global))
            .inspect_err(|err| self.report_error(None, err))
    }

    /// Serve a live entry, if any
    fn lookup(&self, key: CacheKey) -> CacheResult<Option<Arc<V>>> {
        let now = self.context.clock.now();
        let Some(lease) = self.store.get(&key, now) else {
            return Ok(None);
        };
        self.store.touch(&key, now);
        let value = self
            .guard
            .on_load(lease.value())
            .inspect_err(|err| self.report_error(Some(key), err))?;
        drop(lease);

        self.stats.record_hit();
        tracing::trace!(computation = %self.name(), key = %key, "Cache hit");
        self.notice(CacheEvent::Hit {
            computation: self.name().to_string(),
            key,
        });
        Ok(Some(value))
    }

    /// Compute as the flight leader, store, and resolve every waiter
    fn lead(&self, key: CacheKey, inputs: &Inputs, flight: FlightGuard<V>) -> CacheResult<Arc<V>> {
        // Another leader may have stored the key since our lookup.
        let now = self.context.clock.now();
        if let Some(lease) = self.store.get(&key, now) {
            let stored = Arc::clone(lease.value());
            drop(lease);
            self.store.touch(&key, now);
            flight.resolve(Ok(Arc::clone(&stored)));
            self.stats.record_hit();
            self.notice(CacheEvent::Hit {
                computation: self.name().to_string(),
                key,
            });
            return self
                .guard
                .on_load(&stored)
                .inspect_err(|err| self.report_error(Some(key), err));
        }

        self.stats.record_miss();
        tracing::debug!(computation = %self.name(), key = %key, "Cache miss, computing");
        self.notice(CacheEvent::Miss {
            computation: self.name().to_string(),
            key,
        });

        let produced = match catch_unwind(AssertUnwindSafe(|| (self.compute)(inputs))) {
            Ok(Ok(value)) => Arc::new(value),
            Ok(Err(source)) => {
                let err = CacheError::computation_failed(self.name(), source);
                return Err(self.fail(key, &flight, err));
            }
            Err(_) => {
                let err = CacheError::computation_panicked(self.name());
                return Err(self.fail(key, &flight, err));
            }
        };

        match self.guard.on_store(&produced) {
            Ok(stored) => {
                self.store
                    .put(key, Arc::clone(&stored), self.context.clock.now());
                flight.resolve(Ok(stored));
            }
            Err(err) => {
                tracing::warn!(
                    computation = %self.name(),
                    key = %key,
                    error = %err,
                    "Value could not be copied into the cache; returning it uncached"
                );
                self.report_error(Some(key), &err);
                flight.resolve(Err(err));
            }
        }
        Ok(produced)
    }

    /// Hand a waiter the outcome of another caller's computation
    fn settle(&self, key: CacheKey, outcome: Outcome<V>) -> CacheResult<Arc<V>> {
        match outcome {
            Ok(stored) => {
                self.stats.record_coalesced();
                tracing::trace!(computation = %self.name(), key = %key, "Joined in-flight computation");
                self.notice(CacheEvent::Hit {
                    computation: self.name().to_string(),
                    key,
                });
                self.guard
                    .on_load(&stored)
                    .inspect_err(|err| self.report_error(Some(key), err))
            }
            Err(err) => {
                self.stats.record_error();
                Err(err)
            }
        }
    }

    fn fail(&self, key: CacheKey, flight: &FlightGuard<V>, err: CacheError) -> CacheError {
        tracing::debug!(computation = %self.name(), key = %key, error = %err, "Computation failed");
        self.report_error(Some(key), &err);
        flight.resolve(Err(err.clone()));
        err
    }

    fn report_error(&self, key: Option<CacheKey>, err: &CacheError) {
        self.stats.record_error();
        self.context.events.emit(CacheEvent::Error {
            computation: self.name().to_string(),
            key,
            code: err.code(),
            message: err.to_string(),
        });
    }

    fn notice(&self, event: CacheEvent) {
        if self.suppress_notices {
            let noticed = match event {
                CacheEvent::Hit { .. } => &self.hit_noticed,
                _ => &self.miss_noticed,
            };
            if noticed.swap(true, Ordering::AcqRel) {
                return;
            }
        }
        self.context.events.emit(event);
    }

    fn invoke(&self, inputs: &Inputs) -> CacheResult<Arc<V>> {
        let key = self.key_for(inputs)?;
        if let Some(value) = self.lookup(key)? {
            return Ok(value);
        }
        match self.flights.claim(key, self.name()) {
            Claim::Leader(flight) => self.lead(key, inputs, flight),
            Claim::Waiter(flight) => self.settle(key, flight.wait()),
        }
    }
}

impl<V: Send + Sync + 'static> Administered for MemoInner<V> {
    fn clear(&self) -> usize {
        let removed = self.store.clear();
        tracing::debug!(computation = %self.name(), removed, "Cleared cache");
        removed
    }

    fn stats(&self) -> CacheStats {
        self.stats
            .snapshot(self.store.size(), self.store.policy().max_entries())
    }

    fn purge_expired(&self) -> usize {
        self.store.purge_expired(self.context.clock.now())
    }
}

/// Handle to a registered, memoized computation
///
/// Cloning is cheap; clones share the same cache.
pub struct Memoized<V> {
    inner: Arc<MemoInner<V>>,
}

impl<V> Clone for Memoized<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Send + Sync + 'static> Memoized<V> {
    pub(crate) fn from_inner(inner: Arc<MemoInner<V>>) -> Self {
        Self { inner }
    }

    pub(crate) fn administered(&self) -> Arc<dyn Administered> {
        Arc::clone(&self.inner) as Arc<dyn Administered>
    }

    /// Call the computation, answering from the cache when possible
    ///
    /// Concurrent calls with equal inputs run the computation once; the others
    /// wait for it and share its outcome.
    ///
    /// # Errors
    ///
    /// - [`CacheError::NotHashable`] if an input cannot be fingerprinted; the
    ///   computation does not run.
    /// - [`CacheError::ComputationFailed`] / [`CacheError::ComputationPanicked`]
    ///   if the computation failed, for this caller and every waiter. Nothing
    ///   is cached.
    /// - [`CacheError::NotCopyable`] if a stored value could not be copied out.
    pub fn invoke(&self, inputs: &Inputs) -> CacheResult<Arc<V>> {
        self.inner.invoke(inputs)
    }

    /// Async form of [`invoke`](Self::invoke)
    ///
    /// The computation runs on tokio's blocking pool. Dropping the returned
    /// future does not cancel it: other callers waiting on the same key still
    /// receive its outcome, and it is still cached.
    ///
    /// # Errors
    ///
    /// Same as [`invoke`](Self::invoke).
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[cfg(feature = "async")]
    pub async fn invoke_async(&self, inputs: Inputs) -> CacheResult<Arc<V>> {
        let key = self.inner.key_for(&inputs)?;
        if let Some(value) = self.inner.lookup(key)? {
            return Ok(value);
        }
        match self.inner.flights.claim(key, self.name()) {
            Claim::Leader(flight) => {
                let inner = Arc::clone(&self.inner);
                let task = tokio::task::spawn_blocking(move || inner.lead(key, &inputs, flight));
                task.await
                    .unwrap_or_else(|_| Err(CacheError::computation_panicked(self.name())))
            }
            Claim::Waiter(flight) => {
                let outcome = flight.wait_async().await;
                self.inner.settle(key, outcome)
            }
        }
    }

    /// Fingerprint a call without running or caching anything
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NotHashable`] if an input cannot be fingerprinted.
    pub fn key(&self, inputs: &Inputs) -> CacheResult<CacheKey> {
        self.inner.key_for(inputs)
    }

    /// Whether a live entry exists for the call, without touching it
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NotHashable`] if an input cannot be fingerprinted.
    pub fn contains(&self, inputs: &Inputs) -> CacheResult<bool> {
        let key = self.inner.key_for(inputs)?;
        Ok(self.inner.store.contains(&key, self.inner.context.clock.now()))
    }

    /// Drop every entry of this computation; returns how many were removed
    pub fn clear(&self) -> usize {
        Administered::clear(&*self.inner)
    }

    /// Remove expired entries now; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        Administered::purge_expired(&*self.inner)
    }

    /// Current statistics
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        Administered::stats(&*self.inner)
    }

    /// Number of computations currently running
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.flights.len()
    }

    /// Registered name
    #[must_use]
    pub fn name(&self) -> &str {
        self.inner.id.name()
    }

    /// Identity folded into every key
    #[must_use]
    pub fn id(&self) -> &ComputationId {
        &self.inner.id
    }

    /// Active mutation mode
    #[must_use]
    pub fn mutation_mode(&self) -> MutationMode {
        self.inner.guard.mode()
    }
}

impl<V> fmt::Debug for Memoized<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized")
            .field("id", &self.inner.id)
            .field("mode", &self.inner.guard.mode())
            .finish_non_exhaustive()
    }
}
