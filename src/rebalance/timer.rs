//! Single-slot retry timer for deferred assignments.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;

/// A single-slot timer.
///
/// Arming it replaces (and disarms) any previously armed action, so at
/// most one deferred re-exchange is ever pending per demander. Must be
/// used from within a tokio runtime.
#[derive(Debug, Default)]
pub struct RetryTimer {
    slot: Mutex<Option<JoinHandle<()>>>,
}

impl RetryTimer {
    /// Create a new, unarmed timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer: run `action` after `delay`, replacing any
    /// previously armed action.
    pub fn schedule<F>(&self, delay: Duration, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action();
        });
        if let Some(old) = self.slot.lock().replace(handle) {
            old.abort();
        }
    }

    /// Disarm the timer if armed.
    pub fn cancel(&self) {
        if let Some(handle) = self.slot.lock().take() {
            handle.abort();
        }
    }

    /// Whether an action is armed and has not fired yet.
    pub fn is_armed(&self) -> bool {
        self.slot
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for RetryTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
