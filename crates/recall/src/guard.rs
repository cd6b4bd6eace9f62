//! Mutation guard between callers and stored values
//!
//! In [`MutationMode::CopyOnStoreAndLoad`] the store keeps its own deep copy
//! and every load hands back a fresh one, so a caller mutating what it got
//! (through `Arc::get_mut` or `Arc::make_mut`) never affects the cache or
//! other callers. In [`MutationMode::TrustCaller`] the stored `Arc` itself is
//! shared; callers promise not to mutate through interior mutability.

use std::fmt;
use std::sync::Arc;

use crate::error::{BoxError, CacheError, CacheResult};

/// Fallible deep-copy function for stored values
pub type Copier<V> = Arc<dyn Fn(&V) -> Result<V, BoxError> + Send + Sync>;

/// How stored values are protected from caller mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutationMode {
    /// Store a copy of the produced value and return a copy on every load
    #[default]
    CopyOnStoreAndLoad,
    /// Share the stored value with every caller
    TrustCaller,
}

/// Applies the configured [`MutationMode`] when values enter or leave a store
pub struct MutationGuard<V> {
    computation: Arc<str>,
    mode: MutationMode,
    copier: Option<Copier<V>>,
}

impl<V> MutationGuard<V> {
    /// Guard that shares stored values as-is
    #[must_use]
    pub fn trusting(computation: &str) -> Self {
        Self {
            computation: Arc::from(computation),
            mode: MutationMode::TrustCaller,
            copier: None,
        }
    }

    /// Guard for `mode` using a caller-supplied deep copy
    #[must_use]
    pub fn with_copier(computation: &str, mode: MutationMode, copier: Copier<V>) -> Self {
        Self {
            computation: Arc::from(computation),
            mode,
            copier: Some(copier),
        }
    }

    /// Guard for `mode` when no copy function is available
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NotCopyable`] when `mode` requires copying.
    pub fn without_copier(computation: &str, mode: MutationMode) -> CacheResult<Self> {
        match mode {
            MutationMode::TrustCaller => Ok(Self::trusting(computation)),
            MutationMode::CopyOnStoreAndLoad => Err(CacheError::not_copyable(
                computation,
                "copy-on-store-and-load requires a Clone value or an explicit copier",
            )),
        }
    }

    /// Active mode
    #[must_use]
    pub fn mode(&self) -> MutationMode {
        self.mode
    }

    /// Produce the value to keep in the store from a freshly computed one
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NotCopyable`] when the copier fails.
    pub fn on_store(&self, produced: &Arc<V>) -> CacheResult<Arc<V>> {
        self.guarded(produced)
    }

    /// Produce the value to hand a caller from a stored one
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NotCopyable`] when the copier fails.
    pub fn on_load(&self, stored: &Arc<V>) -> CacheResult<Arc<V>> {
        self.guarded(stored)
    }

    fn guarded(&self, value: &Arc<V>) -> CacheResult<Arc<V>> {
        match (self.mode, &self.copier) {
            (MutationMode::TrustCaller, _) => Ok(Arc::clone(value)),
            (MutationMode::CopyOnStoreAndLoad, Some(copy)) => copy(value)
                .map(Arc::new)
                .map_err(|e| CacheError::not_copyable(&self.computation, e.to_string())),
            (MutationMode::CopyOnStoreAndLoad, None) => Err(CacheError::not_copyable(
                &self.computation,
                "no copier configured",
            )),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> MutationGuard<V> {
    /// Guard for `mode` that copies with [`Clone`]
    #[must_use]
    pub fn cloning(computation: &str, mode: MutationMode) -> Self {
        match mode {
            MutationMode::TrustCaller => Self::trusting(computation),
            MutationMode::CopyOnStoreAndLoad => {
                Self::with_copier(computation, mode, Arc::new(|value: &V| Ok::<V, BoxError>(value.clone())))
            }
        }
    }
}

impl<V> fmt::Debug for MutationGuard<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationGuard")
            .field("computation", &self.computation)
            .field("mode", &self.mode)
            .field("copier", &self.copier.is_some())
            .finish()
    }
}
