use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::control::ReadyAnnouncement;
use crate::error::{Result, SupervisorError};

/// Protocol name a worker must announce.
pub const PROTOCOL_NAME: &str = "workerctl";
/// Protocol version spoken by this supervisor.
pub const PROTOCOL_VERSION: &str = "1.0";

const MAX_VERSION_LEN: usize = 16;

/// What a readiness wait observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyOutcome {
    Announced(ReadyAnnouncement),
    /// The output stream ended (or the worker was killed) first.
    Closed,
    TimedOut,
}

#[derive(Debug)]
enum Slot {
    Waiting,
    Announced(ReadyAnnouncement),
    Closed,
}

/// Hand-off of the worker's `ready` directive from the output reader to `start()`.
#[derive(Debug)]
pub(crate) struct ReadyLatch {
    slot: Mutex<Slot>,
    changed: Condvar,
}

impl ReadyLatch {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Waiting),
            changed: Condvar::new(),
        }
    }

    /// Record the first announcement. Later announcements are ignored.
    pub(crate) fn announce(&self, announcement: ReadyAnnouncement) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if !matches!(*slot, Slot::Waiting) {
            return false;
        }
        *slot = Slot::Announced(announcement);
        self.changed.notify_all();
        true
    }

    pub(crate) fn close(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*slot, Slot::Waiting) {
            *slot = Slot::Closed;
            self.changed.notify_all();
        }
    }

    pub(crate) fn wait(&self, timeout: Duration) -> ReadyOutcome {
        let guard = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let (slot, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |slot| matches!(slot, Slot::Waiting))
            .unwrap_or_else(PoisonError::into_inner);
        match &*slot {
            Slot::Waiting => ReadyOutcome::TimedOut,
            Slot::Announced(announcement) => ReadyOutcome::Announced(announcement.clone()),
            Slot::Closed => ReadyOutcome::Closed,
        }
    }
}

/// Check a worker's `ready` announcement against the local protocol.
pub fn validate_announcement(announcement: &ReadyAnnouncement) -> Result<()> {
    if announcement.protocol != PROTOCOL_NAME {
        return Err(SupervisorError::Startup(format!(
            "unknown protocol '{}' (expected '{}')",
            announcement.protocol, PROTOCOL_NAME
        )));
    }
    if announcement.version.is_empty() || announcement.version.len() > MAX_VERSION_LEN {
        return Err(SupervisorError::Startup(format!(
            "invalid protocol version length: {}",
            announcement.version.len()
        )));
    }
    if !is_version_compatible(PROTOCOL_VERSION, &announcement.version)? {
        return Err(SupervisorError::Startup(format!(
            "incompatible version '{}' (supervisor '{}')",
            announcement.version, PROTOCOL_VERSION
        )));
    }
    Ok(())
}

/// Same major, and the worker's minor is at least the supervisor's.
fn is_version_compatible(local_version: &str, worker_version: &str) -> Result<bool> {
    let (local_major, local_minor) = parse_version(local_version)?;
    let (worker_major, worker_minor) = parse_version(worker_version)?;
    Ok(local_major == worker_major && worker_minor >= local_minor)
}

fn parse_version(version: &str) -> Result<(u16, u16)> {
    let invalid = |why: &str| SupervisorError::Startup(format!("invalid version '{version}': {why}"));

    let mut parts = version.split('.');
    let major = parts.next().ok_or_else(|| invalid("missing major"))?;
    let minor = parts.next().ok_or_else(|| invalid("missing minor"))?;
    if parts.next().is_some() {
        return Err(invalid("expected '<major>.<minor>'"));
    }

    let major = major
        .parse::<u16>()
        .map_err(|_| invalid("non-numeric major"))?;
    let minor = minor
        .parse::<u16>()
        .map_err(|_| invalid("non-numeric minor"))?;
    Ok((major, minor))
}
