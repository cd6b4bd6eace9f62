//! Background expiry sweep
//!
//! A dedicated thread runs a tick function at a fixed interval until the
//! tick asks to stop or the [`Sweeper`] is dropped.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct Shutdown {
    requested: Mutex<bool>,
    signal: Condvar,
}

/// Handle to a running sweep thread; stops and joins it on drop
pub struct Sweeper {
    interval: Duration,
    shutdown: Arc<Shutdown>,
    thread: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Spawn a thread calling `tick` every `interval`
    ///
    /// The thread exits when `tick` returns `false`.
    pub(crate) fn spawn<F>(interval: Duration, tick: F) -> Self
    where
        F: Fn() -> bool + Send + 'static,
    {
        let shutdown = Arc::new(Shutdown::default());
        let signal = Arc::clone(&shutdown);

        let thread = thread::spawn(move || {
            loop {
                let mut requested = signal.requested.lock();
                if !*requested {
                    signal.signal.wait_for(&mut requested, interval);
                }
                if *requested {
                    break;
                }
                drop(requested);

                if !tick() {
                    break;
                }
            }
            tracing::trace!("Expiry sweeper stopped");
        });

        tracing::debug!(interval = ?interval, "Started expiry sweeper");
        Self {
            interval,
            shutdown,
            thread: Some(thread),
        }
    }

    /// Sweep interval
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the sweep thread is still running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|thread| !thread.is_finished())
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        *self.shutdown.requested.lock() = true;
        self.shutdown.signal.notify_all();

        if let Some(thread) = self.thread.take() {
            // The last owner may be released from inside a tick; never join
            // the current thread.
            if thread.thread().id() != thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use super::*;

    #[test]
    fn test_ticks_until_dropped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let sweeper = Sweeper::spawn(Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        while ticks.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(ticks.load(Ordering::SeqCst) >= 2);

        drop(sweeper);
        let after = ticks.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), after);
    }

    #[test]
    fn test_drop_does_not_wait_for_interval() {
        let sweeper = Sweeper::spawn(Duration::from_secs(3600), || true);
        let started = Instant::now();
        drop(sweeper);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_stops_when_tick_declines() {
        let sweeper = Sweeper::spawn(Duration::from_millis(1), || false);
        let deadline = Instant::now() + Duration::from_secs(5);
        while sweeper.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert!(!sweeper.is_running());
    }
}
