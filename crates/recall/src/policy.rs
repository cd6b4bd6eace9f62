//! Per-type hashing strategies
//!
//! A [`HashPolicy`] maps the [`TypeId`] of an input value to the
//! [`HashStrategy`] used to reduce it to a digest. Types without an entry are
//! digested structurally from their serde encoding.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::canonical;

/// Type-erased custom reduction: value to canonical bytes
pub(crate) type ReduceFn =
    Arc<dyn Fn(&dyn Any) -> Result<Vec<u8>, String> + Send + Sync + 'static>;

/// How values of one type contribute to a cache key
#[derive(Clone)]
pub enum HashStrategy {
    /// Digest of the value's serde encoding (the default)
    Structural,
    /// Digest of a caller-supplied reduction of the value
    Custom(ReduceFn),
    /// Every value of the type maps to the same digest
    Ignore,
    /// Digest of the value's storage address
    Identity,
}

impl fmt::Debug for HashStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Structural => f.write_str("Structural"),
            Self::Custom(_) => f.write_str("Custom(..)"),
            Self::Ignore => f.write_str("Ignore"),
            Self::Identity => f.write_str("Identity"),
        }
    }
}

#[derive(Debug, Clone)]
struct PolicyEntry {
    type_name: &'static str,
    strategy: HashStrategy,
}

/// Mapping from value type to hashing strategy
#[derive(Debug, Clone, Default)]
pub struct HashPolicy {
    entries: HashMap<TypeId, PolicyEntry>,
}

impl HashPolicy {
    /// Create an empty policy (everything structural)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reduction for `T`; the digest of the reduced value stands
    /// for the original. Last registration for a type wins.
    pub fn register<T, R, F>(&mut self, reduce: F) -> &mut Self
    where
        T: Any,
        R: Serialize,
        F: Fn(&T) -> R + Send + Sync + 'static,
    {
        let erased: ReduceFn = Arc::new(move |value: &dyn Any| {
            let value = value
                .downcast_ref::<T>()
                .ok_or_else(|| format!("policy for `{}` applied to another type", type_name::<T>()))?;
            canonical::to_bytes(&reduce(value)).map_err(|e| e.to_string())
        });
        self.set::<T>(HashStrategy::Custom(erased))
    }

    /// Exclude `T` from key computation
    pub fn ignore<T: Any>(&mut self) -> &mut Self {
        self.set::<T>(HashStrategy::Ignore)
    }

    /// Digest `T` by storage address instead of by value
    pub fn identity<T: Any>(&mut self) -> &mut Self {
        self.set::<T>(HashStrategy::Identity)
    }

    /// Force structural digesting for `T`, shadowing a broader policy
    pub fn structural<T: Any>(&mut self) -> &mut Self {
        self.set::<T>(HashStrategy::Structural)
    }

    /// Set an explicit strategy for `T`
    pub fn set<T: Any>(&mut self, strategy: HashStrategy) -> &mut Self {
        self.entries.insert(
            TypeId::of::<T>(),
            PolicyEntry {
                type_name: type_name::<T>(),
                strategy,
            },
        );
        self
    }

    /// Strategy registered for a type, if any
    #[must_use]
    pub fn get(&self, type_id: TypeId) -> Option<&HashStrategy> {
        self.entries.get(&type_id).map(|entry| &entry.strategy)
    }

    /// Whether `T` has an explicit strategy
    #[must_use]
    pub fn contains<T: Any>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    /// Merge `other` into `self`; entries from `other` win
    pub fn extend(&mut self, other: &Self) {
        for (type_id, entry) in &other.entries {
            self.entries.insert(*type_id, entry.clone());
        }
    }

    /// Names of the types with explicit strategies, sorted
    #[must_use]
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.values().map(|e| e.type_name).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered types
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no types are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Layered policy lookup: per-computation overrides first, then global
#[derive(Debug, Clone, Copy)]
pub struct PolicyScope<'a> {
    local: &'a HashPolicy,
    global: Option<&'a HashPolicy>,
}

impl<'a> PolicyScope<'a> {
    /// Scope with only a local policy
    #[must_use]
    pub fn local(local: &'a HashPolicy) -> Self {
        Self {
            local,
            global: None,
        }
    }

    /// Scope with a local policy falling back to a global one
    #[must_use]
    pub fn layered(local: &'a HashPolicy, global: &'a HashPolicy) -> Self {
        Self {
            local,
            global: Some(global),
        }
    }

    /// Resolve the strategy for a type
    #[must_use]
    pub fn resolve(&self, type_id: TypeId) -> Option<&'a HashStrategy> {
        self.local
            .get(type_id)
            .or_else(|| self.global.and_then(|global| global.get(type_id)))
    }
}
