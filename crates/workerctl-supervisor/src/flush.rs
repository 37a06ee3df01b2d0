//! Flush token allocation and acknowledgment matching.
//!
//! Every flush directive carries a fresh token. The worker echoes the token
//! in a `flush_ack` on its output stream, possibly out of issuance order,
//! so resolution is always by token. Each token resolves at most once:
//! `Pending -> Completed` or `Pending -> Abandoned`.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::control::FlushAck;

/// Coordinator view of a flush token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushState {
    Pending,
    Completed,
    Abandoned,
}

impl fmt::Display for FlushState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FlushState::Pending => "pending",
            FlushState::Completed => "completed",
            FlushState::Abandoned => "abandoned",
        })
    }
}

/// Result of waiting on a flush token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The worker acknowledged the flush.
    Completed(FlushAck),
    /// The worker died first. Terminal; retrying the same token is pointless.
    Abandoned,
    /// The wait ended while the token was still pending.
    TimedOut,
}

impl FlushOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, FlushOutcome::Completed(_))
    }
}

#[derive(Debug)]
enum Resolution {
    Pending,
    Completed(FlushAck),
    Abandoned,
}

#[derive(Debug)]
struct FlushSlot {
    resolution: Mutex<Resolution>,
    resolved: Condvar,
}

impl FlushSlot {
    fn new(resolution: Resolution) -> Self {
        Self {
            resolution: Mutex::new(resolution),
            resolved: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Resolution> {
        self.resolution.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve once; later calls are ignored.
    fn resolve(&self, to: Resolution) -> bool {
        let mut resolution = self.lock();
        if !matches!(*resolution, Resolution::Pending) {
            return false;
        }
        *resolution = to;
        self.resolved.notify_all();
        true
    }
}

/// Caller's handle on one flush request.
#[derive(Debug, Clone)]
pub struct FlushHandle {
    token: String,
    slot: Arc<FlushSlot>,
}

impl FlushHandle {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn state(&self) -> FlushState {
        match *self.slot.lock() {
            Resolution::Pending => FlushState::Pending,
            Resolution::Completed(_) => FlushState::Completed,
            Resolution::Abandoned => FlushState::Abandoned,
        }
    }

    /// Block until the token resolves.
    ///
    /// Worker death abandons every pending token, so this returns once the
    /// death is detected (by `kill`, `close`, the output reader reaching
    /// end-of-stream, or a liveness check).
    pub fn wait(&self) -> FlushOutcome {
        let resolution = self
            .slot
            .resolved
            .wait_while(self.slot.lock(), |r| matches!(r, Resolution::Pending))
            .unwrap_or_else(PoisonError::into_inner);
        outcome_of(&resolution)
    }

    /// Block until the token resolves or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> FlushOutcome {
        let (resolution, _) = self
            .slot
            .resolved
            .wait_timeout_while(self.slot.lock(), timeout, |r| {
                matches!(r, Resolution::Pending)
            })
            .unwrap_or_else(PoisonError::into_inner);
        outcome_of(&resolution)
    }
}

fn outcome_of(resolution: &Resolution) -> FlushOutcome {
    match resolution {
        Resolution::Pending => FlushOutcome::TimedOut,
        Resolution::Completed(ack) => FlushOutcome::Completed(ack.clone()),
        Resolution::Abandoned => FlushOutcome::Abandoned,
    }
}

#[derive(Debug, Default)]
struct Tokens {
    pending: HashMap<String, Arc<FlushSlot>>,
    resolved: HashMap<String, FlushState>,
    resolved_order: VecDeque<String>,
    /// Set once the worker is known dead; new tokens are born abandoned.
    closed: bool,
}

impl Tokens {
    fn remember(&mut self, token: String, state: FlushState, history: usize) {
        if history == 0 {
            return;
        }
        while self.resolved_order.len() >= history {
            if let Some(oldest) = self.resolved_order.pop_front() {
                self.resolved.remove(&oldest);
            }
        }
        self.resolved.insert(token.clone(), state);
        self.resolved_order.push_back(token);
    }
}

/// Issues flush tokens and resolves them from acknowledgments.
#[derive(Debug)]
pub struct FlushCoordinator {
    prefix: String,
    next: AtomicU64,
    history: usize,
    tokens: Mutex<Tokens>,
}

impl FlushCoordinator {
    /// Tokens render as `{prefix}{n}` with `n` counting up from 1.
    pub fn new(prefix: impl Into<String>, history: usize) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
            history,
            tokens: Mutex::new(Tokens::default()),
        }
    }

    fn tokens(&self) -> MutexGuard<'_, Tokens> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a fresh, never reused token in the `Pending` state.
    pub fn allocate(&self) -> FlushHandle {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        let token = format!("{}{n}", self.prefix);

        let mut tokens = self.tokens();
        if tokens.closed {
            tokens.remember(token.clone(), FlushState::Abandoned, self.history);
            return FlushHandle {
                token,
                slot: Arc::new(FlushSlot::new(Resolution::Abandoned)),
            };
        }

        let slot = Arc::new(FlushSlot::new(Resolution::Pending));
        tokens.pending.insert(token.clone(), Arc::clone(&slot));
        FlushHandle { token, slot }
    }

    /// Resolve the token named in `ack` as completed.
    ///
    /// Returns false for tokens that are unknown or already resolved.
    pub fn complete(&self, ack: FlushAck) -> bool {
        let mut tokens = self.tokens();
        let Some(slot) = tokens.pending.remove(&ack.id) else {
            debug!(token = %ack.id, "acknowledgment for unknown or resolved flush token");
            return false;
        };
        let token = ack.id.clone();
        let changed = slot.resolve(Resolution::Completed(ack));
        tokens.remember(token.clone(), FlushState::Completed, self.history);
        debug!(%token, "flush completed");
        changed
    }

    /// Abandon a single pending token, e.g. when its directive could not be written.
    pub fn abandon(&self, token: &str) -> bool {
        let mut tokens = self.tokens();
        let Some(slot) = tokens.pending.remove(token) else {
            return false;
        };
        let changed = slot.resolve(Resolution::Abandoned);
        tokens.remember(token.to_string(), FlushState::Abandoned, self.history);
        changed
    }

    /// Abandon every pending token and every token allocated from now on.
    ///
    /// Returns the number of tokens that were pending.
    pub fn abandon_all(&self) -> usize {
        let mut tokens = self.tokens();
        tokens.closed = true;
        let drained: Vec<_> = tokens.pending.drain().collect();
        for (token, slot) in &drained {
            slot.resolve(Resolution::Abandoned);
            debug!(%token, "flush abandoned");
        }
        for (token, _) in drained.iter() {
            tokens.remember(token.clone(), FlushState::Abandoned, self.history);
        }
        drained.len()
    }

    /// Current state of `token`, if it is pending or still in the resolved history.
    pub fn state(&self, token: &str) -> Option<FlushState> {
        let tokens = self.tokens();
        if tokens.pending.contains_key(token) {
            return Some(FlushState::Pending);
        }
        tokens.resolved.get(token).copied()
    }

    pub fn pending_count(&self) -> usize {
        self.tokens().pending.len()
    }
}
