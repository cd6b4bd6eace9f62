//! Registration and administration of memoized computations
//!
//! A [`Registry`] owns the process-wide pieces every computation shares: the
//! global [`HashPolicy`], the diagnostic [`EventBus`] and the clock. Each
//! registered computation gets its own entry store and is addressable by
//! name for clearing and statistics.

use std::any::Any;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::clock::Clock;
use crate::config::{MemoConfig, RegistryConfig};
use crate::error::{BoxError, CacheError, CacheResult};
use crate::events::{CacheEvent, EventBus};
use crate::fingerprint::ComputationId;
use crate::guard::MutationGuard;
use crate::inputs::Inputs;
use crate::memo::{Administered, ComputeFn, MemoInner, Memoized};
use crate::policy::HashPolicy;
use crate::stats::CacheStats;
use crate::sweeper::Sweeper;

/// State shared by every computation of one registry
pub(crate) struct Context {
    pub(crate) global_policy: RwLock<HashPolicy>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) clock: Arc<dyn Clock>,
}

struct RegistryInner {
    context: Arc<Context>,
    computations: DashMap<String, Arc<dyn Administered>>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl RegistryInner {
    fn purge_expired(&self) -> usize {
        self.computations
            .iter()
            .map(|entry| entry.value().purge_expired())
            .sum()
    }

    fn clear_all(&self) -> usize {
        // Snapshot first so no shard lock is held while stores are cleared.
        let computations: Vec<_> = self
            .computations
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        computations.iter().map(|computation| computation.clear()).sum()
    }
}

/// Registry of memoized computations
///
/// Cloning is cheap; clones refer to the same registry.
///
/// # Examples
///
/// ```
/// use recall::{BoxError, Inputs, MemoConfig, Registry};
///
/// let registry = Registry::new();
/// let square = registry
///     .register("square", MemoConfig::new(), |inputs: &Inputs| -> Result<u64, BoxError> {
///         let n = *inputs.get::<u64>(0).ok_or("missing n")?;
///         Ok(n * n)
///     })
///     .unwrap();
///
/// assert_eq!(*square.invoke(&Inputs::new().arg(4_u64)).unwrap(), 16);
/// assert_eq!(registry.stats("square").unwrap().misses, 1);
/// ```
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Create a registry with the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::build(RegistryConfig::default())
    }

    /// Create a registry with a custom configuration
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidConfig`] if the configuration is invalid.
    pub fn with_config(config: RegistryConfig) -> CacheResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: RegistryConfig) -> Self {
        let registry = Self {
            inner: Arc::new(RegistryInner {
                context: Arc::new(Context {
                    global_policy: RwLock::new(HashPolicy::new()),
                    events: Arc::new(EventBus::new(config.event_buffer)),
                    clock: config.clock,
                }),
                computations: DashMap::new(),
                sweeper: Mutex::new(None),
            }),
        };
        if let Some(interval) = config.sweep_interval {
            registry.spawn_sweeper(interval);
        }
        registry
    }

    // ---------------------------------------------------------------------
    // Registration
    // ---------------------------------------------------------------------

    /// Register a computation whose values are copied with [`Clone`]
    ///
    /// Registering a name again replaces the earlier computation and clears
    /// its entries.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidConfig`] if `config` is invalid.
    pub fn register<V, F, E>(&self, name: &str, config: MemoConfig, compute: F) -> CacheResult<Memoized<V>>
    where
        V: Clone + Send + Sync + 'static,
        F: Fn(&Inputs) -> Result<V, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        let guard = MutationGuard::cloning(name, config.mutation);
        self.install(name, config, guard, compute)
    }

    /// Register a computation with an explicit deep-copy function
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidConfig`] if `config` is invalid.
    pub fn register_with_copier<V, C, F, E>(
        &self,
        name: &str,
        config: MemoConfig,
        copier: C,
        compute: F,
    ) -> CacheResult<Memoized<V>>
    where
        V: Send + Sync + 'static,
        C: Fn(&V) -> Result<V, BoxError> + Send + Sync + 'static,
        F: Fn(&Inputs) -> Result<V, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        let guard = MutationGuard::with_copier(name, config.mutation, Arc::new(copier));
        self.install(name, config, guard, compute)
    }

    /// Register a computation whose values cannot be copied
    ///
    /// Only valid with [`MutationMode::TrustCaller`](crate::MutationMode::TrustCaller): every caller shares the
    /// stored value.
    ///
    /// # Errors
    ///
    /// - [`CacheError::NotCopyable`] if `config` asks for copy-on-store-and-load.
    /// - [`CacheError::InvalidConfig`] if `config` is invalid.
    pub fn register_shared<V, F, E>(&self, name: &str, config: MemoConfig, compute: F) -> CacheResult<Memoized<V>>
    where
        V: Send + Sync + 'static,
        F: Fn(&Inputs) -> Result<V, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        let guard = MutationGuard::without_copier(name, config.mutation)?;
        self.install(name, config, guard, compute)
    }

    fn install<V, F, E>(
        &self,
        name: &str,
        config: MemoConfig,
        guard: MutationGuard<V>,
        compute: F,
    ) -> CacheResult<Memoized<V>>
    where
        V: Send + Sync + 'static,
        F: Fn(&Inputs) -> Result<V, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        config.validate()?;

        let id = ComputationId::of::<F>(name, config.code_version.as_deref());
        let compute: ComputeFn<V> =
            Arc::new(move |inputs: &Inputs| -> Result<V, BoxError> { compute(inputs).map_err(Into::into) });
        let memoized = Memoized::from_inner(Arc::new(MemoInner::new(
            id,
            config.clone(),
            guard,
            compute,
            Arc::clone(&self.inner.context),
        )));

        if let Some(previous) = self
            .inner
            .computations
            .insert(name.to_string(), memoized.administered())
        {
            let removed = previous.clear();
            tracing::debug!(computation = %name, removed, "Replaced registered computation");
        }

        tracing::debug!(
            computation = %name,
            ttl = ?config.ttl,
            max_entries = ?config.max_entries,
            mutation = ?config.mutation,
            "Registered memoized computation"
        );
        Ok(memoized)
    }

    /// Remove a computation from the registry and clear its entries
    ///
    /// Returns whether the name was registered. Existing handles keep
    /// working with an empty cache.
    pub fn unregister(&self, name: &str) -> bool {
        match self.inner.computations.remove(name) {
            Some((_, computation)) => {
                computation.clear();
                true
            }
            None => false,
        }
    }

    // ---------------------------------------------------------------------
    // Global hash policy
    // ---------------------------------------------------------------------

    /// Fingerprint every `T` input by the digest of `reduce(value)`
    ///
    /// Applies to all computations without their own policy for `T`. The last
    /// registration for a type wins, and every cache is cleared.
    pub fn register_hash_policy<T, R>(&self, reduce: impl Fn(&T) -> R + Send + Sync + 'static)
    where
        T: Any,
        R: Serialize,
    {
        self.update_policy(std::any::type_name::<T>(), |policy| {
            policy.register(reduce);
        });
    }

    /// Exclude every `T` input from fingerprints
    pub fn ignore_type<T: Any>(&self) {
        self.update_policy(std::any::type_name::<T>(), |policy| {
            policy.ignore::<T>();
        });
    }

    /// Fingerprint every `T` input by storage identity
    pub fn identity_type<T: Any>(&self) {
        self.update_policy(std::any::type_name::<T>(), |policy| {
            policy.identity::<T>();
        });
    }

    fn update_policy(&self, type_name: &str, update: impl FnOnce(&mut HashPolicy)) {
        let mut policy = self.inner.context.global_policy.write();
        update(&mut policy);
        drop(policy);
        let removed = self.inner.clear_all();
        tracing::debug!(type_name, removed, "Updated global hash policy; caches cleared");
    }

    /// Snapshot of the global hash policy
    #[must_use]
    pub fn hash_policy(&self) -> HashPolicy {
        self.inner.context.global_policy.read().clone()
    }

    // ---------------------------------------------------------------------
    // Administration
    // ---------------------------------------------------------------------

    /// Clear the entries of one computation; returns how many were removed
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::UnknownComputation`] if `name` is not registered.
    pub fn clear(&self, name: &str) -> CacheResult<usize> {
        let computation = self.lookup(name)?;
        Ok(computation.clear())
    }

    /// Clear the entries of every computation; returns how many were removed
    pub fn clear_all(&self) -> usize {
        self.inner.clear_all()
    }

    /// Statistics of one computation
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::UnknownComputation`] if `name` is not registered.
    pub fn stats(&self, name: &str) -> CacheResult<CacheStats> {
        Ok(self.lookup(name)?.stats())
    }

    /// Remove expired entries of every computation now
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    /// Names of the registered computations, sorted
    #[must_use]
    pub fn computations(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .computations
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort_unstable();
        names
    }

    /// Whether `name` is registered
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.computations.contains_key(name)
    }

    /// Subscribe to cache events of every computation
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.context.events.subscribe()
    }

    /// Time source used for expiry
    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.inner.context.clock)
    }

    /// Start (or restart) the background expiry sweep
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidConfig`] for a zero interval.
    pub fn start_sweeper(&self, interval: Duration) -> CacheResult<()> {
        if interval.is_zero() {
            return Err(CacheError::invalid_config("sweep_interval must be greater than 0"));
        }
        self.spawn_sweeper(interval);
        Ok(())
    }

    /// Stop the background expiry sweep; returns whether one was running
    pub fn stop_sweeper(&self) -> bool {
        let sweeper = self.inner.sweeper.lock().take();
        sweeper.is_some()
    }

    /// Whether a background expiry sweep is running
    #[must_use]
    pub fn is_sweeping(&self) -> bool {
        self.inner
            .sweeper
            .lock()
            .as_ref()
            .is_some_and(Sweeper::is_running)
    }

    fn spawn_sweeper(&self, interval: Duration) {
        let registry: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let sweeper = Sweeper::spawn(interval, move || {
            let Some(registry) = registry.upgrade() else {
                return false;
            };
            let purged = registry.purge_expired();
            if purged > 0 {
                tracing::trace!(purged, "Swept expired entries");
            }
            true
        });
        // The previous sweeper, if any, is stopped outside the lock.
        let previous = self.inner.sweeper.lock().replace(sweeper);
        drop(previous);
    }

    fn lookup(&self, name: &str) -> CacheResult<Arc<dyn Administered>> {
        self.inner
            .computations
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| CacheError::unknown_computation(name))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("computations", &self.computations())
            .field("sweeping", &self.is_sweeping())
            .finish_non_exhaustive()
    }
}
