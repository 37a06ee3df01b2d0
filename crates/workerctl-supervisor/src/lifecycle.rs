use std::fmt;
use std::sync::{Mutex, PoisonError};

use tracing::debug;

/// Lifecycle of the supervised worker. Variants are ordered; state only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WorkerState {
    Starting,
    Ready,
    Running,
    Terminating,
    Dead,
}

impl WorkerState {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::Starting => "starting",
            WorkerState::Ready => "ready",
            WorkerState::Running => "running",
            WorkerState::Terminating => "terminating",
            WorkerState::Dead => "dead",
        }
    }

    /// The worker accepts records in this state.
    pub fn accepts_input(self) -> bool {
        matches!(self, WorkerState::Ready | WorkerState::Running)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared holder of the single current [`WorkerState`].
#[derive(Debug)]
pub struct Lifecycle {
    state: Mutex<WorkerState>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(WorkerState::Starting),
        }
    }

    pub fn get(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `to` if it lies ahead of the current state.
    ///
    /// Returns true when the state changed, so repeated `Dead` reports from
    /// several detection paths are harmless.
    pub fn advance(&self, to: WorkerState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if to <= *state {
            return false;
        }
        debug!(from = %*state, to = %to, "worker lifecycle transition");
        *state = to;
        true
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_are_monotonic() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.get(), WorkerState::Starting);

        assert!(lifecycle.advance(WorkerState::Ready));
        assert!(lifecycle.advance(WorkerState::Running));
        assert!(!lifecycle.advance(WorkerState::Ready));
        assert_eq!(lifecycle.get(), WorkerState::Running);
    }

    #[test]
    fn dead_is_idempotent() {
        let lifecycle = Lifecycle::new();
        lifecycle.advance(WorkerState::Running);
        assert!(lifecycle.advance(WorkerState::Dead));
        assert!(!lifecycle.advance(WorkerState::Dead));
        assert!(!lifecycle.advance(WorkerState::Terminating));
        assert_eq!(lifecycle.get(), WorkerState::Dead);
    }

    #[test]
    fn ready_can_jump_straight_to_dead() {
        let lifecycle = Lifecycle::new();
        lifecycle.advance(WorkerState::Ready);
        assert!(lifecycle.advance(WorkerState::Dead));
        assert!(!lifecycle.get().accepts_input());
    }

    #[test]
    fn concurrent_dead_reports_change_state_once() {
        let lifecycle = std::sync::Arc::new(Lifecycle::new());
        lifecycle.advance(WorkerState::Running);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lifecycle = std::sync::Arc::clone(&lifecycle);
                std::thread::spawn(move || lifecycle.advance(WorkerState::Dead))
            })
            .collect();
        let changed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|changed| *changed)
            .count();
        assert_eq!(changed, 1);
    }
}
