//! Worker process launch facility.
//!
//! Spawns the external worker with its three standard streams piped back to
//! the supervisor:
//! - stdin: framed records and control directives
//! - stdout: framed results and acknowledgments
//! - stderr: line-oriented diagnostics
//!
//! This is the lowest layer of workerctl. Everything else builds on top of
//! the [`LaunchedWorker`] bundle provided here.

pub mod command;
pub mod error;
pub mod traits;

pub use command::{ChildProcess, CommandLauncher};
pub use error::{Result, TransportError};
pub use traits::{
    wait_for_exit, InputStream, LaunchedWorker, OutputStream, WorkerLauncher, WorkerProcess,
};
