use std::io::{Read, Write};
use std::process::ExitStatus;
use std::time::{Duration, Instant, SystemTime};

use crate::error::Result;

/// Writable end of the worker's input stream.
pub type InputStream = Box<dyn Write + Send>;

/// Readable end of one of the worker's output streams.
pub type OutputStream = Box<dyn Read + Send>;

/// OS-level handle of a running worker.
///
/// Implementations own the process exclusively; nothing else should signal it.
pub trait WorkerProcess: Send {
    /// OS process identifier.
    fn id(&self) -> u32;

    /// Non-blocking exit check. `Ok(None)` means the process is still running.
    fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>>;

    /// Forcibly terminate the process.
    ///
    /// Killing a process that already exited must succeed.
    fn kill(&mut self) -> std::io::Result<()>;

    /// Cheap liveness probe built on [`WorkerProcess::try_wait`].
    fn is_running(&mut self) -> bool {
        self.try_wait().is_ok_and(|status| status.is_none())
    }
}

/// Everything a launch produces: the process handle and its three streams.
pub struct LaunchedWorker {
    pub process: Box<dyn WorkerProcess>,
    pub stdin: InputStream,
    pub stdout: OutputStream,
    pub stderr: OutputStream,
    /// Wall-clock time the process was spawned.
    pub started_at: SystemTime,
}

impl std::fmt::Debug for LaunchedWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchedWorker")
            .field("pid", &self.process.id())
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

/// Process-launch facility consumed by the supervisor.
pub trait WorkerLauncher {
    /// Start a new worker and hand back its wired streams.
    fn launch(&self) -> Result<LaunchedWorker>;
}

/// Poll `try_wait` until the process exits or `timeout` elapses.
///
/// Returns `Ok(None)` when the process is still running at the deadline.
/// Callers sharing the handle behind a lock take it inside `try_wait`, so
/// it is held for one poll at a time.
pub fn wait_for_exit<F>(
    mut try_wait: F,
    timeout: Duration,
    poll_interval: Duration,
) -> std::io::Result<Option<ExitStatus>>
where
    F: FnMut() -> std::io::Result<Option<ExitStatus>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = try_wait()? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        std::thread::sleep(poll_interval.min(deadline - now));
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::process::ExitStatusExt;

    use super::*;

    struct ExitsAfter {
        polls_left: u32,
    }

    impl WorkerProcess for ExitsAfter {
        fn id(&self) -> u32 {
            7
        }

        fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
            if self.polls_left == 0 {
                return Ok(Some(ExitStatus::from_raw(0)));
            }
            self.polls_left -= 1;
            Ok(None)
        }

        fn kill(&mut self) -> std::io::Result<()> {
            self.polls_left = 0;
            Ok(())
        }
    }

    #[test]
    fn wait_for_exit_observes_exit() {
        let mut process = ExitsAfter { polls_left: 3 };
        let status = wait_for_exit(
            || process.try_wait(),
            Duration::from_secs(1),
            Duration::from_millis(1),
        )
        .unwrap();
        assert!(status.is_some_and(|s| s.success()));
    }

    #[test]
    fn wait_for_exit_times_out() {
        let mut process = ExitsAfter {
            polls_left: u32::MAX,
        };
        let started = Instant::now();
        let status = wait_for_exit(
            || process.try_wait(),
            Duration::from_millis(30),
            Duration::from_millis(5),
        )
        .unwrap();
        assert!(status.is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn is_running_follows_try_wait() {
        let mut process = ExitsAfter { polls_left: 1 };
        assert!(process.is_running());
        assert!(!process.is_running());
        process.kill().unwrap();
        assert!(!process.is_running());
    }
}
