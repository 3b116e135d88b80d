//! Provides the shared network bookkeeping of a render session: the
//! transferred-bytes counter and the in-flight request tracker behind the
//! network-idle wait.
//!
//! Engine bindings report request lifecycle events from their own threads, so
//! both types are cheap to share and lock only for a few instructions.
//!
//! # Examples
//! ```
//! use glimpse_capture::network::{NetworkMonitor, TransferCounter};
//!
//! let counter = TransferCounter::default();
//! counter.add(1024);
//! assert_eq!(counter.total(), 1024);
//!
//! let monitor = NetworkMonitor::new();
//! monitor.request_started("1");
//! assert_eq!(monitor.in_flight(), 1);
//! monitor.request_finished("1");
//! assert_eq!(monitor.in_flight(), 0);
//! ```

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;
use tracing::trace;

use crate::config::IDLE_CHECK_INTERVAL;

/// Running total of payload bytes transferred to the harness.
#[derive(Debug, Clone, Default)]
pub struct TransferCounter(Arc<AtomicU64>);

impl TransferCounter {
    /// Adds `bytes` to the total.
    pub fn add(&self, bytes: u64) {
        self.0.fetch_add(bytes, Ordering::SeqCst);
    }

    /// Returns the bytes recorded so far.
    pub fn total(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Starts a new count.
    pub fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }
}

/// The network did not go quiet before the bound elapsed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("network did not become idle within {0:?}")]
pub struct IdleTimeout(pub Duration);

struct MonitorState {
    in_flight: HashSet<String>,
    last_activity: Instant,
}

/// Tracks in-flight requests and when the network last changed.
pub struct NetworkMonitor {
    state: Mutex<MonitorState>,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkMonitor {
    /// Creates a monitor with nothing in flight.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MonitorState {
                in_flight: HashSet::new(),
                last_activity: Instant::now(),
            }),
        }
    }

    /// Records that request `id` went out. Repeats (redirect hops) are ignored.
    pub fn request_started(&self, id: &str) {
        let mut state = self.state.lock();
        state.in_flight.insert(id.to_owned());
        state.last_activity = Instant::now();
    }

    /// Records that request `id` finished or failed.
    pub fn request_finished(&self, id: &str) {
        let mut state = self.state.lock();
        state.in_flight.remove(id);
        state.last_activity = Instant::now();
    }

    /// Returns the number of requests currently in flight.
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Returns how long nothing has been in flight, or `None` while busy.
    pub fn quiet_for(&self) -> Option<Duration> {
        let state = self.state.lock();
        state
            .in_flight
            .is_empty()
            .then(|| state.last_activity.elapsed())
    }

    /// Waits until nothing has been in flight for `idle`.
    ///
    /// # Errors
    /// Returns [`IdleTimeout`] if `timeout` elapses first. `None` waits forever.
    pub async fn wait_for_idle(
        &self,
        idle: Duration,
        timeout: Option<Duration>,
    ) -> Result<(), IdleTimeout> {
        let started = Instant::now();
        loop {
            let pause = match self.quiet_for() {
                Some(quiet) if quiet >= idle => {
                    trace!(waited = ?started.elapsed(), "network idle");
                    return Ok(());
                }
                Some(quiet) => idle - quiet,
                None => IDLE_CHECK_INTERVAL,
            };

            let pause = match timeout {
                Some(limit) => {
                    let elapsed = started.elapsed();
                    if elapsed >= limit {
                        return Err(IdleTimeout(limit));
                    }
                    pause.min(limit - elapsed)
                }
                None => pause,
            };
            tokio::time::sleep(pause.max(Duration::from_millis(1))).await;
        }
    }
}
