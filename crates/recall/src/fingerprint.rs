//! Fingerprint engine: call identity and inputs to [`CacheKey`]
//!
//! A key covers the computation identity, the ordered positional input
//! digests, the name-sorted keyword input digests and the name-sorted captured
//! variable digests. Computing a key never runs the wrapped computation.

use std::any::{TypeId, type_name};
use std::fmt;

use crate::digest::{Digest, DigestBuilder};
use crate::error::{CacheError, CacheResult, InputSlot};
use crate::inputs::{InputValue, Inputs};
use crate::policy::{HashStrategy, PolicyScope};

const KEY_DOMAIN: &str = "recall.key.v1";
const INPUT_DOMAIN: &str = "recall.input.v1";
const COMPUTATION_DOMAIN: &str = "recall.computation.v1";

/// Stable identity of a wrapped computation within one process
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ComputationId {
    name: String,
    callable: &'static str,
    digest: Digest,
}

impl ComputationId {
    /// Identity of callable type `F` registered as `name`.
    ///
    /// `code_version` is folded in when present, so bumping it invalidates
    /// keys produced by earlier versions of the same computation.
    #[must_use]
    pub fn of<F: 'static>(name: &str, code_version: Option<&str>) -> Self {
        let callable = type_name::<F>();
        let mut builder = DigestBuilder::new(COMPUTATION_DOMAIN);
        builder
            .str(name)
            .str(callable)
            // Distinct closures can share a type name; their TypeIds differ.
            .str(&format!("{:?}", TypeId::of::<F>()));
        match code_version {
            Some(version) => builder.u64(1).str(version),
            None => builder.u64(0),
        };
        Self {
            name: name.to_string(),
            callable,
            digest: builder.finish(),
        }
    }

    /// Declared name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type name of the registered callable
    #[must_use]
    pub fn callable(&self) -> &'static str {
        self.callable
    }

    /// Identity digest
    #[must_use]
    pub fn digest(&self) -> &Digest {
        &self.digest
    }
}

impl fmt::Debug for ComputationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputationId")
            .field("name", &self.name)
            .field("digest", &self.digest)
            .finish()
    }
}

/// Fingerprint of one cacheable call
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Digest);

impl CacheKey {
    #[cfg(test)]
    pub(crate) fn from_digest(digest: Digest) -> Self {
        Self(digest)
    }

    /// Underlying digest
    #[must_use]
    pub fn digest(&self) -> &Digest {
        &self.0
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.0.short())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.short())
    }
}

/// Derive the cache key for a call
pub fn fingerprint(
    computation: &ComputationId,
    inputs: &Inputs,
    policy: PolicyScope<'_>,
) -> CacheResult<CacheKey> {
    let mut key = DigestBuilder::new(KEY_DOMAIN);
    key.digest(computation.digest());

    key.u64(inputs.positional().len() as u64);
    for (index, value) in inputs.positional().iter().enumerate() {
        let digest = digest_input(value, policy, || InputSlot::Positional(index))?;
        key.digest(&digest);
    }

    let keyword: Vec<_> = inputs.keyword().collect();
    key.u64(keyword.len() as u64);
    for (name, value) in keyword {
        let digest = digest_input(value, policy, || InputSlot::Keyword(name.to_string()))?;
        key.str(name).digest(&digest);
    }

    let captured: Vec<_> = inputs.captured_vars().collect();
    key.u64(captured.len() as u64);
    for (name, value) in captured {
        let digest = digest_input(value, policy, || InputSlot::Captured(name.to_string()))?;
        key.str(name).digest(&digest);
    }

    Ok(CacheKey(key.finish()))
}

/// Digest one input value under the resolved strategy
fn digest_input(
    value: &InputValue,
    policy: PolicyScope<'_>,
    slot: impl FnOnce() -> InputSlot,
) -> CacheResult<Digest> {
    let mut builder = DigestBuilder::new(INPUT_DOMAIN);
    builder.str(value.type_name());

    match policy.resolve(value.type_id()) {
        None | Some(HashStrategy::Structural) => match value.structural_bytes() {
            Some(Ok(bytes)) => {
                builder.str("structural").bytes(bytes);
            }
            Some(Err(reason)) => {
                return Err(CacheError::not_hashable(
                    value.type_name(),
                    slot(),
                    format!("structural encoding failed: {reason}"),
                ));
            }
            None => {
                return Err(CacheError::not_hashable(
                    value.type_name(),
                    slot(),
                    "opaque value with no registered hash policy",
                ));
            }
        },
        Some(HashStrategy::Custom(reduce)) => {
            let bytes = reduce(value.as_any()).map_err(|reason| {
                CacheError::not_hashable(
                    value.type_name(),
                    slot(),
                    format!("custom hash function failed: {reason}"),
                )
            })?;
            builder.str("custom").bytes(&bytes);
        }
        Some(HashStrategy::Ignore) => {
            builder.str("ignore");
        }
        Some(HashStrategy::Identity) => {
            builder.str("identity").u64(value.address() as u64);
        }
    }

    Ok(builder.finish())
}
