//! Worker liveness heuristic.
//!
//! There is no synchronous way to ask whether an external process is
//! really alive: a stalled output stream looks the same whether the worker
//! is slow or dead. Process death is usually accompanied by the error
//! stream reaching end-of-stream, so the monitor waits a short, bounded
//! grace period for that signal.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

/// One-shot latch set by the error stream reader at end-of-stream.
#[derive(Debug, Default)]
pub struct EndOfStream {
    reached: Mutex<bool>,
    signalled: Condvar,
}

impl EndOfStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark end-of-stream and wake all waiters. Repeated calls are no-ops.
    pub fn signal(&self) {
        let mut reached = self.reached.lock().unwrap_or_else(PoisonError::into_inner);
        if !*reached {
            *reached = true;
            self.signalled.notify_all();
        }
    }

    pub fn is_reached(&self) -> bool {
        *self.reached.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait at most `timeout` for end-of-stream. Returns whether it was reached.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.reached.lock().unwrap_or_else(PoisonError::into_inner);
        let (reached, _) = self
            .signalled
            .wait_timeout_while(guard, timeout, |reached| !*reached)
            .unwrap_or_else(PoisonError::into_inner);
        *reached
    }
}

/// Combines the OS-level process check with the error-stream signal.
#[derive(Debug)]
pub struct LivenessMonitor {
    grace: Duration,
}

impl LivenessMonitor {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Decide liveness after a bounded wait.
    ///
    /// Returns false immediately when `process_alive` is false. Otherwise
    /// waits up to the grace period for `error_eof`; reaching it means the
    /// worker is dead. A true result is only "probably alive": the error
    /// stream reader may lag behind the real exit, so callers should treat
    /// it as a hint and check again later. Never blocks longer than the grace.
    pub fn check(&self, process_alive: bool, error_eof: &EndOfStream) -> bool {
        if !process_alive {
            return false;
        }
        !error_eof.wait_timeout(self.grace)
    }
}
