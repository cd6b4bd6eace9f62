//! Configuration for memoized computations and registries
//!
//! [`MemoConfig`] is fixed per computation at registration time;
//! [`RegistryConfig`] applies to everything a [`Registry`](crate::Registry)
//! holds.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::error::{CacheError, CacheResult};
use crate::eviction::EvictionPolicy;
use crate::guard::MutationMode;
use crate::policy::HashPolicy;

/// Configuration for one memoized computation
#[derive(Debug, Clone, Default)]
pub struct MemoConfig {
    /// Time-to-live for entries (None means entries never expire)
    pub ttl: Option<Duration>,
    /// Maximum number of entries (None means unbounded)
    pub max_entries: Option<usize>,
    /// How returned values are protected from caller mutation
    pub mutation: MutationMode,
    /// Per-computation hash strategies, consulted before the registry's
    pub hash_policy: HashPolicy,
    /// Emit `Miss`/`Hit` notices only once per registration
    pub suppress_duplicate_notices: bool,
    /// Version tag folded into the computation identity
    pub code_version: Option<String>,
}

impl MemoConfig {
    /// Create a configuration with no expiry and no bound
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the time-to-live for entries
    #[must_use = "builder methods must be chained or built"]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set the maximum number of entries
    #[must_use = "builder methods must be chained or built"]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    /// Set the mutation mode
    #[must_use = "builder methods must be chained or built"]
    pub fn with_mutation(mut self, mutation: MutationMode) -> Self {
        self.mutation = mutation;
        self
    }

    /// Share stored values with callers instead of copying them
    #[must_use = "builder methods must be chained or built"]
    pub fn trust_caller(self) -> Self {
        self.with_mutation(MutationMode::TrustCaller)
    }

    /// Use per-computation hash strategies
    #[must_use = "builder methods must be chained or built"]
    pub fn with_hash_policy(mut self, policy: HashPolicy) -> Self {
        self.hash_policy = policy;
        self
    }

    /// Emit hit and miss notices at most once
    #[must_use = "builder methods must be chained or built"]
    pub fn suppress_duplicate_notices(mut self) -> Self {
        self.suppress_duplicate_notices = true;
        self
    }

    /// Tag the computation with a code version
    ///
    /// Entries written under one version are never returned under another.
    #[must_use = "builder methods must be chained or built"]
    pub fn with_code_version(mut self, version: impl Into<String>) -> Self {
        self.code_version = Some(version.into());
        self
    }

    /// Preset for results that go stale: bounded and expiring
    #[must_use]
    pub fn for_time_sensitive(max_entries: usize, ttl: Duration) -> Self {
        Self::new().with_max_entries(max_entries).with_ttl(ttl)
    }

    /// Preset for large results: bounded, shared without copying
    #[must_use]
    pub fn for_bounded(max_entries: usize) -> Self {
        Self::new().with_max_entries(max_entries).trust_caller()
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidConfig`] for a zero entry bound or a zero
    /// time-to-live.
    pub fn validate(&self) -> CacheResult<()> {
        if self.max_entries == Some(0) {
            return Err(CacheError::invalid_config("max_entries must be greater than 0"));
        }

        if let Some(ttl) = self.ttl
            && ttl.is_zero()
        {
            return Err(CacheError::invalid_config("ttl must be greater than 0"));
        }

        if self.code_version.as_deref().is_some_and(str::is_empty) {
            return Err(CacheError::invalid_config("code_version must not be empty"));
        }

        Ok(())
    }

    pub(crate) fn eviction_policy(&self) -> EvictionPolicy {
        EvictionPolicy::new(self.ttl, self.max_entries)
    }
}

/// Configuration shared by every computation in a registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Capacity of the diagnostic event buffer per subscriber
    pub event_buffer: usize,
    /// Interval of the background expiry sweep (None disables it)
    pub sweep_interval: Option<Duration>,
    /// Time source for expiry and recency
    pub clock: Arc<dyn Clock>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            event_buffer: 1024,
            sweep_interval: None,
            clock: Arc::new(SystemClock),
        }
    }
}

impl RegistryConfig {
    /// Create the default registry configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the event buffer capacity
    #[must_use = "builder methods must be chained or built"]
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    /// Run a background sweep of expired entries at `interval`
    #[must_use = "builder methods must be chained or built"]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Use a custom time source
    #[must_use = "builder methods must be chained or built"]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidConfig`] for an empty event buffer or a
    /// zero sweep interval.
    pub fn validate(&self) -> CacheResult<()> {
        if self.event_buffer == 0 {
            return Err(CacheError::invalid_config("event_buffer must be greater than 0"));
        }

        if let Some(interval) = self.sweep_interval
            && interval.is_zero()
        {
            return Err(CacheError::invalid_config("sweep_interval must be greater than 0"));
        }

        Ok(())
    }
}
