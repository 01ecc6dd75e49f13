//! Traffic bookkeeping for the keep-alive and server-watchdog timers.
//!
//! Both timers are deadline-based: the timer tasks in the manager sleep
//! until `last activity + period` and re-check on wake, so every touch
//! implicitly resets the timer without cancelling anything.

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

pub(crate) struct Liveness {
    last_outbound: Mutex<Instant>,
    last_inbound: Mutex<Instant>,
}

impl Liveness {
    pub(crate) fn new() -> Self {
        let now = Instant::now();
        Self {
            last_outbound: Mutex::new(now),
            last_inbound: Mutex::new(now),
        }
    }

    /// Restarts both clocks, called when a session is (re)installed.
    pub(crate) async fn reset(&self) {
        let now = Instant::now();
        *self.last_outbound.lock().await = now;
        *self.last_inbound.lock().await = now;
    }

    /// Records an outbound send. Called after the send returns.
    pub(crate) async fn touch_outbound(&self) {
        *self.last_outbound.lock().await = Instant::now();
    }

    /// Records inbound traffic. Called after a full transport message has
    /// been dispatched.
    pub(crate) async fn touch_inbound(&self) {
        *self.last_inbound.lock().await = Instant::now();
    }

    /// When the next keep-alive ping is due.
    pub(crate) async fn outbound_deadline(&self, interval: Duration) -> Instant {
        *self.last_outbound.lock().await + interval
    }

    /// When the server is to be declared dead absent further traffic.
    pub(crate) async fn inbound_deadline(&self, timeout: Duration) -> Instant {
        *self.last_inbound.lock().await + timeout
    }
}
