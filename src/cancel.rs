//! Cancellation shared between the monitoring thread and whoever started it.
use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::Duration,
};

#[derive(Debug, Default)]
struct Signal {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

/// A one-shot stop signal. Clones observe the same signal.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    signal: Arc<Signal>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self) -> MutexGuard<'_, bool> {
        self.signal
            .cancelled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Raises the signal and wakes every waiter. Idempotent.
    pub fn cancel(&self) {
        *self.flag() = true;
        self.signal.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.flag()
    }

    /// Sleeps for `timeout` or until cancelled. Returns `true` if cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.flag();
        let (guard, _) = self
            .signal
            .wake
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard
    }
}
