//! Consumer of the worker's error stream.
//!
//! Lines are either structured JSON log records, relayed through `tracing`,
//! or free text. Reaching end-of-stream sets the latch the liveness monitor
//! waits on.

use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, error, info, trace, warn};
use workerctl_transport::OutputStream;

use crate::shared::Shared;

/// Severity of a structured worker log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkerLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl WorkerLogLevel {
    fn parse(level: &str) -> Option<Self> {
        match level.to_ascii_uppercase().as_str() {
            "TRACE" => Some(Self::Trace),
            "DEBUG" => Some(Self::Debug),
            "INFO" => Some(Self::Info),
            "WARN" | "WARNING" => Some(Self::Warn),
            "ERROR" => Some(Self::Error),
            "FATAL" => Some(Self::Fatal),
            _ => None,
        }
    }
}

/// One classified error-stream line.
#[derive(Debug, PartialEq, Eq)]
pub enum ErrorLine<'a> {
    Log {
        level: WorkerLogLevel,
        message: String,
    },
    Text(&'a str),
}

#[derive(Deserialize)]
struct LogRecord {
    level: String,
    message: String,
}

/// Classify a line with its terminator already stripped.
pub fn classify_line(line: &str) -> ErrorLine<'_> {
    if line.trim_start().starts_with('{') {
        if let Ok(record) = serde_json::from_str::<LogRecord>(line) {
            if let Some(level) = WorkerLogLevel::parse(&record.level) {
                return ErrorLine::Log {
                    level,
                    message: record.message,
                };
            }
        }
    }
    ErrorLine::Text(line)
}

pub(crate) struct ErrorReader<R = OutputStream> {
    lines: BufReader<R>,
    shared: Arc<Shared>,
}

impl<R: Read> ErrorReader<R> {
    pub(crate) fn new(stream: R, shared: Arc<Shared>) -> Self {
        Self {
            lines: BufReader::new(stream),
            shared,
        }
    }

    /// Read lines until end-of-stream, then signal it.
    ///
    /// A line longer than the error buffer is counted as malformed. Only its
    /// first `capacity` bytes are kept and the remainder is discarded.
    pub(crate) fn run(mut self) {
        let limit = self.shared.errors.capacity().max(1);
        let mut raw = Vec::new();
        let mut discarding = false;
        loop {
            raw.clear();
            let read = self
                .lines
                .by_ref()
                .take(limit as u64 + 1)
                .read_until(b'\n', &mut raw);
            match read {
                Ok(0) => break,
                Ok(_) => {
                    let complete = raw.ends_with(b"\n");
                    if discarding {
                        discarding = !complete;
                    } else if !complete && raw.len() > limit {
                        self.truncated(&raw[..limit]);
                        discarding = true;
                    } else {
                        self.handle(&raw);
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(pid = self.shared.pid, %err, "worker error stream failed");
                    break;
                }
            }
        }
        debug!(pid = self.shared.pid, "worker error stream closed");
        self.shared.error_eof.signal();
    }

    fn truncated(&self, head: &[u8]) {
        self.shared.stats.record_malformed_error_line();
        warn!(
            pid = self.shared.pid,
            limit = head.len(),
            "truncating over-long error stream line"
        );
        self.shared.errors.push(&String::from_utf8_lossy(head));
    }

    fn handle(&self, raw: &[u8]) {
        let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line,
            Err(err) => {
                self.shared.stats.record_malformed_error_line();
                warn!(pid = self.shared.pid, %err, "skipping non-UTF-8 error stream line");
                return;
            }
        };
        if line.trim().is_empty() {
            return;
        }

        let pid = self.shared.pid;
        match classify_line(line) {
            ErrorLine::Log { level, message } => {
                match level {
                    WorkerLogLevel::Trace => trace!(pid, "worker: {message}"),
                    WorkerLogLevel::Debug => debug!(pid, "worker: {message}"),
                    WorkerLogLevel::Info => info!(pid, "worker: {message}"),
                    WorkerLogLevel::Warn => warn!(pid, "worker: {message}"),
                    WorkerLogLevel::Error | WorkerLogLevel::Fatal => {
                        error!(pid, "worker: {message}")
                    }
                }
                if level >= WorkerLogLevel::Warn {
                    self.shared.errors.push(&message);
                }
            }
            ErrorLine::Text(text) => self.shared.errors.push(text),
        }
    }
}
