//! Single-flight coordination for one cache key
//!
//! The first caller to miss on a key claims a [`Flight`] and computes; every
//! other caller for that key waits on the same flight and receives its
//! outcome. Blocking callers park on a condition variable, async callers on a
//! [`tokio::sync::Notify`].

use std::pin::pin;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use crate::error::{CacheError, CacheResult};
use crate::fingerprint::CacheKey;

/// Outcome shared with every waiter: the stored value or the failure
pub(crate) type Outcome<V> = CacheResult<Arc<V>>;

/// One in-flight computation
pub(crate) struct Flight<V> {
    outcome: Mutex<Option<Outcome<V>>>,
    ready: Condvar,
    notify: Notify,
}

impl<V> Flight<V> {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            ready: Condvar::new(),
            notify: Notify::new(),
        }
    }

    /// Publish the outcome; later calls are ignored
    pub(crate) fn complete(&self, outcome: Outcome<V>) {
        let mut slot = self.outcome.lock();
        if slot.is_some() {
            return;
        }
        *slot = Some(outcome);
        drop(slot);
        self.ready.notify_all();
        self.notify.notify_waiters();
    }

    /// Block until the outcome is published
    pub(crate) fn wait(&self) -> Outcome<V> {
        let mut slot = self.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            self.ready.wait(&mut slot);
        }
    }

    /// Wait for the outcome without blocking the executor
    #[cfg_attr(not(feature = "async"), allow(dead_code))]
    pub(crate) async fn wait_async(&self) -> Outcome<V> {
        loop {
            let mut notified = pin!(self.notify.notified());
            // Register before checking so a completion in between is not lost.
            notified.as_mut().enable();
            let published = self.outcome.lock().clone();
            if let Some(outcome) = published {
                return outcome;
            }
            notified.await;
        }
    }

    fn is_complete(&self) -> bool {
        self.outcome.lock().is_some()
    }
}

/// Role of a caller after trying to claim a key
pub(crate) enum Claim<V> {
    /// This caller computes and must resolve the flight
    Leader(FlightGuard<V>),
    /// Another caller is computing; wait on its flight
    Waiter(Arc<Flight<V>>),
}

/// In-flight computations of one memoized computation, by key
pub(crate) struct FlightTable<V> {
    flights: Arc<DashMap<CacheKey, Arc<Flight<V>>>>,
}

impl<V> FlightTable<V> {
    pub(crate) fn new() -> Self {
        Self {
            flights: Arc::new(DashMap::new()),
        }
    }

    /// Join the flight for `key`, starting one if none is running
    pub(crate) fn claim(&self, key: CacheKey, computation: &str) -> Claim<V> {
        match self.flights.entry(key) {
            Entry::Occupied(entry) => Claim::Waiter(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let flight = Arc::new(Flight::new());
                entry.insert(Arc::clone(&flight));
                Claim::Leader(FlightGuard {
                    key,
                    computation: computation.to_string(),
                    flight,
                    flights: Arc::clone(&self.flights),
                })
            }
        }
    }

    /// Number of computations currently running
    pub(crate) fn len(&self) -> usize {
        self.flights.len()
    }
}

/// Leadership of one flight
///
/// Dropping the guard unregisters the flight. If it was never resolved (the
/// leader unwound), waiters receive [`CacheError::ComputationPanicked`].
pub(crate) struct FlightGuard<V> {
    key: CacheKey,
    computation: String,
    flight: Arc<Flight<V>>,
    flights: Arc<DashMap<CacheKey, Arc<Flight<V>>>>,
}

impl<V> FlightGuard<V> {
    /// Resolve the flight for every waiter
    pub(crate) fn resolve(&self, outcome: Outcome<V>) {
        self.flight.complete(outcome);
    }
}

impl<V> Drop for FlightGuard<V> {
    fn drop(&mut self) {
        if !self.flight.is_complete() {
            self.flight
                .complete(Err(CacheError::computation_panicked(&self.computation)));
        }
        self.flights
            .remove_if(&self.key, |_, current| Arc::ptr_eq(current, &self.flight));
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::digest::Digest;

    fn key() -> CacheKey {
        CacheKey::from_digest(Digest::of("flight-test", b"k"))
    }

    #[test]
    fn test_second_claim_waits() {
        let table = FlightTable::<u32>::new();
        let Claim::Leader(guard) = table.claim(key(), "load") else {
            panic!("first claim leads");
        };
        let Claim::Waiter(flight) = table.claim(key(), "load") else {
            panic!("second claim waits");
        };

        let waiter = thread::spawn(move || flight.wait());
        thread::sleep(Duration::from_millis(20));
        guard.resolve(Ok(Arc::new(7)));
        drop(guard);

        assert_eq!(*waiter.join().unwrap().unwrap(), 7);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_dropped_leader_reports_panic() {
        let table = FlightTable::<u32>::new();
        let Claim::Leader(guard) = table.claim(key(), "load") else {
            panic!("first claim leads");
        };
        let Claim::Waiter(flight) = table.claim(key(), "load") else {
            panic!("second claim waits");
        };
        drop(guard);

        let err = flight.wait().unwrap_err();
        assert!(matches!(err, CacheError::ComputationPanicked { .. }));
        assert!(matches!(table.claim(key(), "load"), Claim::Leader(_)));
    }

    #[tokio::test]
    async fn test_async_waiter_wakes() {
        let table = FlightTable::<u32>::new();
        let Claim::Leader(guard) = table.claim(key(), "load") else {
            panic!("first claim leads");
        };
        let Claim::Waiter(flight) = table.claim(key(), "load") else {
            panic!("second claim waits");
        };

        let waiter = tokio::spawn(async move { flight.wait_async().await });
        tokio::task::yield_now().await;
        guard.resolve(Ok(Arc::new(3)));

        assert_eq!(*waiter.await.unwrap().unwrap(), 3);
    }
}
