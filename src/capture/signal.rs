//! Manual-reset readiness event shared between a driver and a capture thread.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::DriverError;

#[derive(Debug, Default)]
struct EventState {
    set: bool,
    released: bool,
}

/// Stays signalled until `reset`. The driver sets it when frames are
/// pending; the capture thread waits on it.
#[derive(Debug, Default)]
pub struct ManualResetEvent {
    state: Mutex<EventState>,
    cond: Condvar,
}

impl ManualResetEvent {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, EventState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set(&self) {
        let mut state = self.lock();
        if state.released {
            return;
        }
        state.set = true;
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        self.lock().set = false;
    }

    pub fn is_set(&self) -> bool {
        self.lock().set
    }

    /// Block until the event is set or `timeout` elapses. Returns whether it
    /// was set. Returns false at once after `release`.
    pub fn wait(&self, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .cond
            .wait_timeout_while(state, timeout, |s| !s.set && !s.released)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.set && !state.released
    }

    /// Retire the event and wake every waiter. Releasing twice is an error.
    pub fn release(&self) -> Result<(), DriverError> {
        let mut state = self.lock();
        if state.released {
            return Err(DriverError::Closed);
        }
        state.released = true;
        state.set = false;
        self.cond.notify_all();
        Ok(())
    }

    pub fn is_released(&self) -> bool {
        self.lock().released
    }
}
