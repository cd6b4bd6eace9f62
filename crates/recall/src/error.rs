//! Error types for recall
//!
//! Uses thiserror for clean, idiomatic Rust error definitions.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Boxed error produced by a wrapped computation.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Shared form of a computation error, handed to every coalesced waiter.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

// ============================================================================
// Main Error Type
// ============================================================================

/// Errors surfaced by the memoization engine
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    // --- Key computation ---
    #[error("value of type `{type_name}` in {slot} cannot be fingerprinted: {reason}")]
    NotHashable {
        type_name: &'static str,
        slot: InputSlot,
        reason: String,
    },

    // --- Mutation guard ---
    #[error("computation '{computation}' produced a value that cannot be deep-copied: {reason}")]
    NotCopyable { computation: String, reason: String },

    // --- Computation ---
    #[error("computation '{computation}' failed: {source}")]
    ComputationFailed {
        computation: String,
        #[source]
        source: SharedError,
    },

    #[error("computation '{computation}' panicked before producing a value")]
    ComputationPanicked { computation: String },

    // --- Configuration / administration ---
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("no computation registered under '{name}'")]
    UnknownComputation { name: String },
}

/// Where an offending input sits in a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSlot {
    /// Positional input at the given index
    Positional(usize),
    /// Keyword input with the given parameter name
    Keyword(String),
    /// Captured context variable with the given name
    Captured(String),
}

impl fmt::Display for InputSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Positional(index) => write!(f, "positional argument #{index}"),
            Self::Keyword(name) => write!(f, "keyword argument `{name}`"),
            Self::Captured(name) => write!(f, "captured variable `{name}`"),
        }
    }
}

impl CacheError {
    /// Check if retrying the same call may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ComputationFailed { .. } | Self::ComputationPanicked { .. }
        )
    }

    /// Get error code for categorization
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotHashable { .. } => "RECALL:KEY:NOT_HASHABLE",
            Self::NotCopyable { .. } => "RECALL:GUARD:NOT_COPYABLE",
            Self::ComputationFailed { .. } => "RECALL:COMPUTE:FAILED",
            Self::ComputationPanicked { .. } => "RECALL:COMPUTE:PANICKED",
            Self::InvalidConfig { .. } => "RECALL:CONFIG:INVALID",
            Self::UnknownComputation { .. } => "RECALL:REGISTRY:UNKNOWN",
        }
    }

    // ============================================================================
    // Convenience Constructors
    // ============================================================================

    /// Create not hashable error
    pub fn not_hashable(type_name: &'static str, slot: InputSlot, reason: impl Into<String>) -> Self {
        Self::NotHashable {
            type_name,
            slot,
            reason: reason.into(),
        }
    }

    /// Create not copyable error
    pub fn not_copyable(computation: &str, reason: impl Into<String>) -> Self {
        Self::NotCopyable {
            computation: computation.to_string(),
            reason: reason.into(),
        }
    }

    /// Wrap an error returned by the wrapped computation
    pub fn computation_failed(computation: &str, source: BoxError) -> Self {
        Self::ComputationFailed {
            computation: computation.to_string(),
            source: Arc::from(source),
        }
    }

    /// Create computation panicked error
    pub fn computation_panicked(computation: &str) -> Self {
        Self::ComputationPanicked {
            computation: computation.to_string(),
        }
    }

    /// Create invalid config error
    pub fn invalid_config(reason: &str) -> Self {
        Self::InvalidConfig {
            reason: reason.to_string(),
        }
    }

    /// Create unknown computation error
    pub fn unknown_computation(name: &str) -> Self {
        Self::UnknownComputation {
            name: name.to_string(),
        }
    }

    /// The error returned by the wrapped computation, if that is what this is
    #[must_use]
    pub fn computation_source(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            Self::ComputationFailed { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

// ============================================================================
// Result Types
// ============================================================================

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
