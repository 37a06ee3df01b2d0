use std::ffi::{OsStr, OsString};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::SystemTime;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{LaunchedWorker, WorkerLauncher, WorkerProcess};

/// Launches a worker executable with piped stdin, stdout and stderr.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    current_dir: Option<PathBuf>,
}

impl CommandLauncher {
    /// Launcher for `program` with no arguments.
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
        }
    }

    /// Append command-line arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
        self
    }

    /// Add an environment variable for the worker.
    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    /// Run the worker from `dir`.
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// The executable this launcher starts.
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl WorkerLauncher for CommandLauncher {
    fn launch(&self) -> Result<LaunchedWorker> {
        let mut child = self.command().spawn().map_err(|source| TransportError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let started_at = SystemTime::now();
        let pid = child.id();

        let pipes = (child.stdin.take(), child.stdout.take(), child.stderr.take());
        let (stdin, stdout, stderr) = match pipes {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            (stdin, stdout, _) => {
                let missing = if stdin.is_none() {
                    "stdin"
                } else if stdout.is_none() {
                    "stdout"
                } else {
                    "stderr"
                };
                let _ = child.kill();
                let _ = child.wait();
                return Err(TransportError::MissingPipe(missing));
            }
        };

        info!(pid, program = ?self.program, "worker process launched");

        Ok(LaunchedWorker {
            process: Box::new(ChildProcess::new(child)),
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
            started_at,
        })
    }
}

/// [`WorkerProcess`] backed by a [`std::process::Child`].
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
    exit: Option<ExitStatus>,
}

impl ChildProcess {
    pub fn new(child: Child) -> Self {
        Self { child, exit: None }
    }
}

impl WorkerProcess for ChildProcess {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        if self.exit.is_none() {
            self.exit = self.child.try_wait()?;
            if let Some(status) = self.exit {
                debug!(pid = self.child.id(), %status, "worker process exited");
            }
        }
        Ok(self.exit)
    }

    fn kill(&mut self) -> std::io::Result<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        match self.child.kill() {
            Ok(()) => {}
            // Already reaped elsewhere.
            Err(err) if err.kind() == ErrorKind::InvalidInput => {}
            Err(err) => return Err(err),
        }
        self.exit = Some(self.child.wait()?);
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::time::Duration;

    use super::*;
    use crate::traits::wait_for_exit;

    fn sh(script: &str) -> CommandLauncher {
        CommandLauncher::new("sh").args(["-c", script])
    }

    #[test]
    fn launch_wires_all_three_streams() {
        let mut worker = sh("read line; echo \"out:$line\"; echo \"err:$line\" >&2")
            .launch()
            .unwrap();

        worker.stdin.write_all(b"hello\n").unwrap();
        worker.stdin.flush().unwrap();
        drop(worker.stdin);

        let mut out = String::new();
        BufReader::new(worker.stdout).read_line(&mut out).unwrap();
        let mut err = String::new();
        worker.stderr.read_to_string(&mut err).unwrap();

        assert_eq!(out.trim_end(), "out:hello");
        assert_eq!(err.trim_end(), "err:hello");
        assert!(worker.process.id() > 0);
    }

    #[test]
    fn missing_executable_is_spawn_error() {
        let err = CommandLauncher::new("/nonexistent/workerctl-test-binary")
            .launch()
            .unwrap_err();
        assert!(matches!(err, TransportError::Spawn { .. }));
    }

    #[test]
    fn kill_terminates_and_is_idempotent() {
        let mut worker = sh("sleep 30").launch().unwrap();
        assert!(worker.process.is_running());

        worker.process.kill().unwrap();
        assert!(!worker.process.is_running());
        worker.process.kill().unwrap();
    }

    #[test]
    fn try_wait_reports_exit_status() {
        let mut worker = sh("exit 3").launch().unwrap();
        let status = wait_for_exit(
            || worker.process.try_wait(),
            Duration::from_secs(5),
            Duration::from_millis(5),
        )
        .unwrap()
        .expect("process should exit");
        assert_eq!(status.code(), Some(3));
        // Cached after the first observation.
        assert_eq!(worker.process.try_wait().unwrap(), Some(status));
    }

    #[test]
    fn env_and_current_dir_are_applied() {
        let dir = std::env::temp_dir();
        let worker = sh("echo \"$WORKERCTL_TEST_VAR:$(pwd)\"")
            .env("WORKERCTL_TEST_VAR", "set")
            .current_dir(&dir)
            .launch()
            .unwrap();

        let mut out = String::new();
        BufReader::new(worker.stdout).read_line(&mut out).unwrap();
        assert!(out.starts_with("set:"));
    }
}
