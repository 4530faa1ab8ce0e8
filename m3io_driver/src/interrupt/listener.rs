//! Interrupt wake-up targets.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Client reference woken by matching interrupts.
///
/// `wake` is an opaque "new data available" notification; no value is
/// delivered. It runs on the dispatcher thread and must not block.
pub trait EventListener: Send + Sync {
    /// Signal the client.
    fn wake(&self);
}

/// Counting wake-up signal a client thread can block on.
#[derive(Debug, Default)]
pub struct WakeSignal {
    count: Mutex<u64>,
    woken: Condvar,
}

impl WakeSignal {
    /// Create a signal with zero wake-ups.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Total wake-ups received.
    pub fn count(&self) -> u64 {
        *self.count.lock()
    }

    /// Block until at least `target` wake-ups were received.
    ///
    /// Returns false if `timeout` elapsed first.
    pub fn wait_for(&self, target: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count < target {
            if self.woken.wait_until(&mut count, deadline).timed_out() {
                return *count >= target;
            }
        }
        true
    }
}

impl EventListener for WakeSignal {
    fn wake(&self) {
        *self.count.lock() += 1;
        self.woken.notify_all();
    }
}
