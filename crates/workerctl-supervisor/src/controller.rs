use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use bytes::BytesMut;
use tracing::{debug, info, warn};
use workerctl_frame::{encode_record, FrameReader, FrameWriter, CONTROL, RECORD};
use workerctl_transport::{
    wait_for_exit, InputStream, LaunchedWorker, WorkerLauncher, WorkerProcess,
};

use crate::config::{ControllerConfig, ReadinessPolicy};
use crate::control::{ControlMessage, FlushParams};
use crate::error::{Result, SupervisorError};
use crate::error_reader::ErrorReader;
use crate::flush::{FlushHandle, FlushOutcome, FlushState};
use crate::handshake::{validate_announcement, ReadyOutcome};
use crate::lifecycle::WorkerState;
use crate::liveness::LivenessMonitor;
use crate::output_reader::OutputReader;
use crate::shared::{ExitHook, Shared};
use crate::state::{frame_to_io, StateSink, WorkerEvent};
use crate::stats::StatsSnapshot;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

type InputWriter = FrameWriter<BufWriter<InputStream>>;

/// Supervisor of one external worker process.
///
/// Owns the process handle and its three streams. Records and directives go
/// out on the input stream in call order; acknowledgments, results and
/// persisted state come back through a background output reader, and
/// diagnostics through a background error reader. All methods take `&self`
/// so the controller can be shared across threads.
///
/// Dropping the controller performs [`WorkerController::close`].
pub struct WorkerController {
    config: ControllerConfig,
    shared: Arc<Shared>,
    input: Arc<Mutex<Option<InputWriter>>>,
    process: Mutex<Box<dyn WorkerProcess>>,
    events: Mutex<Option<Receiver<WorkerEvent>>>,
    liveness: LivenessMonitor,
    started_at: SystemTime,
    closed: AtomicBool,
}

impl std::fmt::Debug for WorkerController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerController")
            .field("pid", &self.shared.pid)
            .field("state", &self.state())
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

impl WorkerController {
    /// Launch a worker and wire its streams.
    ///
    /// With [`ReadinessPolicy::Handshake`] this blocks until the worker
    /// announces readiness, and kills it when the announcement is missing
    /// or incompatible.
    pub fn start(launcher: &dyn WorkerLauncher, config: ControllerConfig) -> Result<Self> {
        Self::start_with_hook(launcher, config, None)
    }

    /// Like [`WorkerController::start`], with a callback for unexpected worker exits.
    pub fn start_with_hook(
        launcher: &dyn WorkerLauncher,
        config: ControllerConfig,
        on_unexpected_exit: Option<ExitHook>,
    ) -> Result<Self> {
        config.validate()?;
        let LaunchedWorker {
            mut process,
            stdin,
            stdout,
            stderr,
            started_at,
        } = launcher.launch()?;
        let pid = process.id();

        let shared = Arc::new(Shared::new(pid, &config, on_unexpected_exit));
        let (events_tx, events_rx) = mpsc::sync_channel(config.event_buffer);

        let output = OutputReader::new(
            FrameReader::with_config(stdout, config.output_frame_config()),
            Arc::clone(&shared),
            events_tx,
        );
        let errors = ErrorReader::new(stderr, Arc::clone(&shared));
        let spawned = thread::Builder::new()
            .name(format!("workerctl-stdout-{pid}"))
            .spawn(move || output.run())
            .and_then(|_| {
                thread::Builder::new()
                    .name(format!("workerctl-stderr-{pid}"))
                    .spawn(move || errors.run())
            });
        if let Err(err) = spawned {
            let _ = process.kill();
            return Err(SupervisorError::Startup(format!(
                "failed to spawn stream readers: {err}"
            )));
        }

        let input = FrameWriter::with_config(BufWriter::new(stdin), config.input_frame_config());
        let controller = Self {
            liveness: LivenessMonitor::new(config.liveness_grace),
            config,
            shared,
            input: Arc::new(Mutex::new(Some(input))),
            process: Mutex::new(process),
            events: Mutex::new(Some(events_rx)),
            started_at,
            closed: AtomicBool::new(false),
        };

        controller.await_readiness()?;
        info!(pid, "worker ready");
        Ok(controller)
    }

    fn await_readiness(&self) -> Result<()> {
        let timeout = match self.config.readiness {
            ReadinessPolicy::Assume => {
                self.shared.lifecycle.advance(WorkerState::Ready);
                return Ok(());
            }
            ReadinessPolicy::Handshake { timeout } => timeout,
        };

        let failure = match self.shared.ready.wait(timeout) {
            ReadyOutcome::Announced(announcement) => match validate_announcement(&announcement) {
                Ok(()) => {
                    debug!(pid = self.shared.pid, version = %announcement.version, "handshake complete");
                    self.shared.lifecycle.advance(WorkerState::Ready);
                    return Ok(());
                }
                Err(err) => err,
            },
            ReadyOutcome::Closed => SupervisorError::Startup(format!(
                "worker exited before announcing readiness: {}",
                self.read_error()
            )),
            ReadyOutcome::TimedOut => SupervisorError::Startup(format!(
                "worker did not announce readiness within {timeout:?}"
            )),
        };
        self.kill();
        Err(failure)
    }

    /// True once the worker accepts records, until it terminates.
    pub fn is_ready(&self) -> bool {
        self.state().accepts_input()
    }

    pub fn state(&self) -> WorkerState {
        self.shared.lifecycle.get()
    }

    pub fn pid(&self) -> u32 {
        self.shared.pid
    }

    pub fn get_process_start_time(&self) -> SystemTime {
        self.started_at
    }

    fn lock_input(&self) -> MutexGuard<'_, Option<InputWriter>> {
        self.input.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_process(&self) -> MutexGuard<'_, Box<dyn WorkerProcess>> {
        self.process.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `op` against the input stream of a live worker.
    fn with_input<T>(
        &self,
        what: &str,
        op: impl FnOnce(&mut InputWriter) -> Result<T>,
    ) -> Result<T> {
        let mut input = self.lock_input();
        if self.state() == WorkerState::Dead {
            return Err(SupervisorError::worker_dead(what));
        }
        let writer = input
            .as_mut()
            .ok_or_else(|| SupervisorError::stream_closed(what))?;
        let value = op(writer)?;
        self.shared.lifecycle.advance(WorkerState::Running);
        Ok(value)
    }

    /// Encode and write one record. Nothing is flushed and nothing is acknowledged.
    pub fn write_record<S: AsRef<str>>(&self, fields: &[S]) -> Result<()> {
        let mut payload = BytesMut::new();
        encode_record(fields, &mut payload)?;
        self.with_input("write_record", |writer| Ok(writer.send(RECORD, &payload)?))
    }

    /// Request a flush and return its token without waiting for the worker.
    ///
    /// The directive follows every record written before it and is pushed
    /// out immediately. Completion is observed through the returned handle.
    pub fn flush_job(&self, params: &FlushParams) -> Result<FlushHandle> {
        params.validate()?;
        self.with_input("flush_job", |writer| {
            let handle = self.shared.flushes.allocate();
            let sent = ControlMessage::flush(handle.token(), params)
                .and_then(|message| message.to_bytes())
                .and_then(|bytes| {
                    writer.send(CONTROL, &bytes)?;
                    writer.flush()?;
                    Ok(())
                });
            if let Err(err) = sent {
                self.shared.flushes.abandon(handle.token());
                return Err(err);
            }
            debug!(pid = self.shared.pid, token = handle.token(), "flush requested");
            Ok(handle)
        })
    }

    /// Push buffered input bytes to the worker.
    pub fn flush_stream(&self) -> Result<()> {
        self.with_input("flush_stream", |writer| Ok(writer.flush()?))
    }

    /// Stream previously persisted state into the worker.
    ///
    /// `restorer` writes the state bytes. The state stream is terminated on
    /// every path; a failing restorer surfaces as [`SupervisorError::Restore`].
    /// No records can interleave with the state bytes.
    pub fn restore_state<F>(&self, restorer: F) -> Result<u64>
    where
        F: FnOnce(&mut dyn Write) -> std::io::Result<()>,
    {
        let chunk_size = self.config.state_chunk_size;
        self.with_input("restore_state", |writer| {
            let mut sink = StateSink::new(writer, chunk_size);
            let restored = restorer(&mut sink);
            let finished = sink.finish();
            match (restored, finished) {
                (Ok(()), Ok(bytes)) => {
                    debug!(pid = self.shared.pid, bytes, "state restored");
                    Ok(bytes)
                }
                (Ok(()), Err(err)) => Err(SupervisorError::Io(err)),
                (Err(err), finished) => {
                    if let Err(close_err) = finished {
                        warn!(pid = self.shared.pid, %close_err, "failed to close state stream");
                    }
                    Err(SupervisorError::Restore(err))
                }
            }
        })
    }

    /// Ask the worker to stream its state out.
    ///
    /// The state arrives later as a [`WorkerEvent::State`].
    pub fn persist_state(&self) -> Result<()> {
        let bytes = ControlMessage::persist().to_bytes()?;
        self.with_input("persist_state", |writer| {
            writer.send(CONTROL, &bytes)?;
            writer.flush()?;
            Ok(())
        })
    }

    /// Receiver of results and persisted state. Available once.
    pub fn take_events(&self) -> Option<Receiver<WorkerEvent>> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn flush_state(&self, token: &str) -> Option<FlushState> {
        self.shared.flushes.state(token)
    }

    /// Wait for a flush to resolve, checking worker liveness between slices.
    ///
    /// Returns [`FlushOutcome::TimedOut`] when `timeout` elapses while the
    /// worker still looks alive; the token then stays pending.
    pub fn wait_for_flush(&self, handle: &FlushHandle, timeout: Duration) -> FlushOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            let slice = self
                .config
                .flush_poll_interval
                .min(deadline.saturating_duration_since(Instant::now()));
            match handle.wait_timeout(slice) {
                FlushOutcome::TimedOut => {}
                outcome => return outcome,
            }

            if !self.is_process_alive_after_waiting() {
                // Let the output reader drain acknowledgments already in the pipe.
                if let outcome @ FlushOutcome::Completed(_) =
                    handle.wait_timeout(self.liveness.grace())
                {
                    return outcome;
                }
                if self.shared.mark_dead() {
                    warn!(pid = self.shared.pid, "worker found dead while waiting for flush");
                }
                return handle.wait_timeout(Duration::ZERO);
            }

            if Instant::now() >= deadline {
                return FlushOutcome::TimedOut;
            }
        }
    }

    /// Non-blocking OS-level check that the process has not exited.
    pub fn is_process_alive(&self) -> bool {
        self.lock_process().is_running()
    }

    /// Liveness after a bounded wait on the error stream's end-of-stream.
    ///
    /// A heuristic: false is reliable, true only means no sign of death
    /// appeared within the configured grace period (45 ms by default).
    pub fn is_process_alive_after_waiting(&self) -> bool {
        self.liveness
            .check(self.is_process_alive(), &self.shared.error_eof)
    }

    /// Worker diagnostics collected so far. Empty when there are none.
    pub fn read_error(&self) -> String {
        self.shared.errors.contents()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Terminate the worker immediately. Idempotent and never fails.
    pub fn kill(&self) {
        self.shared.request_termination();
        if let Err(err) = self.lock_process().kill() {
            warn!(pid = self.shared.pid, %err, "failed to kill worker");
        }
        self.release_input();
        if self.shared.mark_dead() {
            info!(pid = self.shared.pid, "worker killed");
        }
    }

    /// Graceful shutdown: signal end of input, wait up to the shutdown
    /// timeout, then kill. Releases the streams and the process on every
    /// path. Idempotent and never fails.
    ///
    /// A worker that stopped draining its input cannot hold this past the
    /// shutdown timeout: `end_of_input` is written from a helper thread.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _release = ReleaseGuard(self);

        self.shared.request_termination();
        self.shared.lifecycle.advance(WorkerState::Terminating);
        self.signal_end_of_input();

        let timeout = self.config.shutdown_timeout;
        match wait_for_exit(|| self.lock_process().try_wait(), timeout, EXIT_POLL_INTERVAL) {
            Ok(Some(status)) => info!(pid = self.shared.pid, %status, "worker exited"),
            Ok(None) => warn!(
                pid = self.shared.pid,
                ?timeout,
                "worker did not exit in time; killing"
            ),
            Err(err) => debug!(pid = self.shared.pid, %err, "exit status unavailable"),
        }
    }

    /// Hand the input writer to a thread that sends `end_of_input` and drops it.
    ///
    /// The thread blocks for as long as the worker does not read; killing the
    /// worker fails the pending write.
    fn signal_end_of_input(&self) {
        let input = Arc::clone(&self.input);
        let pid = self.shared.pid;
        let spawned = thread::Builder::new()
            .name(format!("workerctl-eoi-{pid}"))
            .spawn(move || {
                let writer = input.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(mut writer) = writer {
                    if let Err(err) = send_end_of_input(&mut writer) {
                        debug!(pid, %err, "could not signal end of input");
                    }
                }
            });
        if let Err(err) = spawned {
            warn!(pid, %err, "could not spawn end-of-input writer");
        }
    }

    /// Drop the input writer without waiting on a writer blocked in the pipe.
    ///
    /// A busy writer keeps it; its write fails once the worker is gone and
    /// the lifecycle is `Dead`, so nothing can use it afterwards.
    fn release_input(&self) {
        match self.input.try_lock() {
            Ok(mut input) => drop(input.take()),
            Err(TryLockError::Poisoned(poisoned)) => drop(poisoned.into_inner().take()),
            Err(TryLockError::WouldBlock) => {
                debug!(pid = self.shared.pid, "input stream busy; left to its writer")
            }
        }
    }
}

fn send_end_of_input(writer: &mut InputWriter) -> std::io::Result<()> {
    let bytes = ControlMessage::end_of_input()
        .to_bytes()
        .map_err(std::io::Error::other)?;
    writer.send(CONTROL, &bytes).map_err(frame_to_io)?;
    writer.flush().map_err(frame_to_io)
}

/// Releases the input stream and the process when `close()` returns or unwinds.
struct ReleaseGuard<'a>(&'a WorkerController);

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        let controller = self.0;
        if let Err(err) = controller.lock_process().kill() {
            warn!(pid = controller.shared.pid, %err, "failed to release worker process");
        }
        controller.release_input();
        controller.shared.mark_dead();
        debug!(pid = controller.shared.pid, "worker resources released");
    }
}

impl Drop for WorkerController {
    fn drop(&mut self) {
        self.close();
    }
}
