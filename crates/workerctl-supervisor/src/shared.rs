use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error};

use crate::config::ControllerConfig;
use crate::error_buffer::ErrorBuffer;
use crate::flush::FlushCoordinator;
use crate::handshake::ReadyLatch;
use crate::lifecycle::{Lifecycle, WorkerState};
use crate::liveness::EndOfStream;
use crate::stats::ReaderStats;

/// Callback invoked once when the worker exits without being asked to.
///
/// Receives the error buffer contents at the time of the exit.
pub type ExitHook = Arc<dyn Fn(&str) + Send + Sync>;

/// State touched by both the controller and its stream reader threads.
pub(crate) struct Shared {
    pub(crate) pid: u32,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) flushes: FlushCoordinator,
    pub(crate) errors: ErrorBuffer,
    pub(crate) error_eof: EndOfStream,
    pub(crate) stats: ReaderStats,
    pub(crate) ready: ReadyLatch,
    /// Set by `kill()`/`close()` before they touch the process.
    termination_requested: AtomicBool,
    on_unexpected_exit: Option<ExitHook>,
}

impl Shared {
    pub(crate) fn new(
        pid: u32,
        config: &ControllerConfig,
        on_unexpected_exit: Option<ExitHook>,
    ) -> Self {
        Self {
            pid,
            lifecycle: Lifecycle::new(),
            flushes: FlushCoordinator::new(config.token_prefix.clone(), config.flush_history),
            errors: ErrorBuffer::new(config.error_buffer_capacity),
            error_eof: EndOfStream::new(),
            stats: ReaderStats::default(),
            ready: ReadyLatch::new(),
            termination_requested: AtomicBool::new(false),
            on_unexpected_exit,
        }
    }

    pub(crate) fn request_termination(&self) {
        self.termination_requested.store(true, Ordering::SeqCst);
    }

    pub(crate) fn termination_requested(&self) -> bool {
        self.termination_requested.load(Ordering::SeqCst)
    }

    /// Move to `Dead` and release everyone waiting on the worker.
    ///
    /// Returns true for the call that performed the transition.
    pub(crate) fn mark_dead(&self) -> bool {
        let changed = self.lifecycle.advance(WorkerState::Dead);
        let abandoned = self.flushes.abandon_all();
        self.ready.close();
        if abandoned > 0 {
            debug!(pid = self.pid, abandoned, "pending flushes abandoned");
        }
        changed
    }

    /// The output stream reached end-of-stream.
    pub(crate) fn output_closed(&self) {
        let expected = self.termination_requested();
        if !self.mark_dead() || expected {
            debug!(pid = self.pid, "worker output stream closed");
            return;
        }

        let errors = self.errors.contents();
        error!(pid = self.pid, errors = %errors, "worker exited unexpectedly");
        if let Some(hook) = &self.on_unexpected_exit {
            hook(&errors);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::flush::FlushState;

    fn counting_hook() -> (ExitHook, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let hook: ExitHook = {
            let calls = Arc::clone(&calls);
            Arc::new(move |_: &str| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        (hook, calls)
    }

    #[test]
    fn unexpected_close_fires_hook_once() {
        let (hook, calls) = counting_hook();
        let shared = Shared::new(1, &ControllerConfig::default(), Some(hook));
        shared.lifecycle.advance(WorkerState::Running);
        let handle = shared.flushes.allocate();

        shared.output_closed();
        shared.output_closed();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(shared.lifecycle.get(), WorkerState::Dead);
        assert_eq!(handle.state(), FlushState::Abandoned);
    }

    #[test]
    fn requested_termination_is_not_reported() {
        let (hook, calls) = counting_hook();
        let shared = Shared::new(1, &ControllerConfig::default(), Some(hook));
        shared.request_termination();
        shared.output_closed();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(shared.lifecycle.get(), WorkerState::Dead);
    }
}
