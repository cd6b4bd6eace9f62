//! # recall
//!
//! In-process memoization for expensive computations.
//!
//! A computation registered with a [`Registry`] is keyed by a fingerprint of
//! its identity, its positional and keyword inputs and any captured context
//! values. Results are kept in a bounded, concurrent store with optional
//! time-to-live, and concurrent callers asking for the same key share a
//! single computation.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//!
//! use recall::prelude::*;
//!
//! let registry = Registry::new();
//! let square = registry
//!     .register(
//!         "square",
//!         MemoConfig::for_time_sensitive(100, Duration::from_secs(5)),
//!         |inputs: &Inputs| -> Result<u64, BoxError> {
//!             let n = *inputs.get::<u64>(0).ok_or("missing n")?;
//!             Ok(n * n)
//!         },
//!     )
//!     .unwrap();
//!
//! assert_eq!(*square.invoke(&Inputs::new().arg(12_u64)).unwrap(), 144);
//! assert_eq!(*square.invoke(&Inputs::new().arg(12_u64)).unwrap(), 144);
//!
//! let stats = registry.stats("square").unwrap();
//! assert_eq!((stats.hits, stats.misses), (1, 1));
//! ```
//!
//! ## Fingerprints
//!
//! Inputs added with [`Inputs::arg`], [`Inputs::kwarg`] and
//! [`Inputs::captured`] are digested from their serde encoding. Values
//! without one (connections, handles) are added with the `opaque_*` methods
//! and need a [`HashPolicy`] entry (custom reduction, ignore or identity)
//! or the call fails with [`CacheError::NotHashable`] before anything runs.
//!
//! ## Mutation safety
//!
//! By default every caller receives its own copy of a cached value
//! ([`MutationMode::CopyOnStoreAndLoad`]). [`MutationMode::TrustCaller`]
//! shares one `Arc` between all callers instead.
//!
//! ## Features
//!
//! - `async` (default): [`Memoized::invoke_async`] on tokio's blocking pool

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(clippy::all)]
#![warn(clippy::perf)]
#![warn(clippy::pedantic)]
#![warn(rust_2018_idioms)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
// Precision loss in u64 -> f64 casts is acceptable for stats
#![allow(clippy::cast_precision_loss)]
// Key material is length-prefixed as u64; addresses and counts fit
#![allow(clippy::cast_possible_truncation)]
// #[must_use] on fns returning Self/Result documents intent even if type is already must_use
#![allow(clippy::double_must_use)]
#![allow(clippy::return_self_not_must_use)]

// Error types
pub mod error;

// Fingerprinting
mod canonical;
pub mod digest;
pub mod fingerprint;
pub mod inputs;
pub mod policy;

// Storage
pub mod clock;
pub mod eviction;
pub mod guard;
pub mod store;
pub mod sweeper;

// Invocation and administration
mod flight;
pub mod memo;
pub mod registry;

// Configuration and observability
pub mod config;
pub mod events;
pub mod stats;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{MemoConfig, RegistryConfig};
pub use error::{BoxError, CacheError, CacheResult, InputSlot};
pub use events::{CacheEvent, EventBus, EvictReason};
pub use fingerprint::{CacheKey, ComputationId, fingerprint};
pub use guard::{Copier, MutationGuard, MutationMode};
pub use inputs::{InputValue, Inputs};
pub use memo::Memoized;
pub use policy::{HashPolicy, HashStrategy, PolicyScope};
pub use registry::Registry;
pub use stats::CacheStats;

/// Common imports
pub mod prelude {
    pub use crate::clock::ManualClock;
    pub use crate::config::{MemoConfig, RegistryConfig};
    pub use crate::error::{BoxError, CacheError, CacheResult};
    pub use crate::events::CacheEvent;
    pub use crate::guard::MutationMode;
    pub use crate::inputs::Inputs;
    pub use crate::memo::Memoized;
    pub use crate::policy::HashPolicy;
    pub use crate::registry::Registry;
    pub use crate::stats::CacheStats;
}
