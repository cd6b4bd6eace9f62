//! Diagnostic events for cache observability.
//!
//! Provides [`CacheEvent`] variants emitted by the coordinator and entry
//! stores, and an [`EventBus`] backed by `tokio::sync::broadcast`.

use tokio::sync::broadcast;

use crate::fingerprint::CacheKey;

// ---------------------------------------------------------------------------
// CacheEvent
// ---------------------------------------------------------------------------

/// Events emitted while serving memoized calls.
///
/// All variants carry the `computation` name. Subscribers receive cloned
/// copies via [`EventBus::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// No live entry existed; the computation ran.
    Miss {
        /// The computation name.
        computation: String,
        /// Fingerprint of the call.
        key: CacheKey,
    },
    /// A live entry answered the call.
    Hit {
        /// The computation name.
        computation: String,
        /// Fingerprint of the call.
        key: CacheKey,
    },
    /// An entry was removed before its time ran out.
    Evict {
        /// The computation name.
        computation: String,
        /// Fingerprint of the evicted entry.
        key: CacheKey,
        /// Why the entry was removed.
        reason: EvictReason,
    },
    /// An entry outlived its time-to-live and was removed.
    Expire {
        /// The computation name.
        computation: String,
        /// Fingerprint of the expired entry.
        key: CacheKey,
    },
    /// A call failed (key computation, the computation itself, or storage).
    Error {
        /// The computation name.
        computation: String,
        /// Fingerprint of the call, when one could be computed.
        key: Option<CacheKey>,
        /// Stable error code, see [`CacheError::code`](crate::CacheError::code).
        code: &'static str,
        /// Human-readable error description.
        message: String,
    },
}

impl CacheEvent {
    /// Name of the computation the event belongs to
    #[must_use]
    pub fn computation(&self) -> &str {
        match self {
            Self::Miss { computation, .. }
            | Self::Hit { computation, .. }
            | Self::Evict { computation, .. }
            | Self::Expire { computation, .. }
            | Self::Error { computation, .. } => computation,
        }
    }
}

// ---------------------------------------------------------------------------
// EvictReason
// ---------------------------------------------------------------------------

/// Reason an entry was removed ahead of expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictReason {
    /// The store exceeded its maximum entry count (least recently used first).
    Capacity,
    /// Explicit `remove` of the entry.
    Removed,
    /// The whole store was cleared.
    Cleared,
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast-based event bus for cache diagnostics.
///
/// Emission is fire-and-forget: if no subscribers are listening or a
/// subscriber lags behind the buffer, events are dropped for it.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<CacheEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer size.
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size.max(1));
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    pub fn emit(&self, event: CacheEvent) {
        // Only fails when nobody is subscribed.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
