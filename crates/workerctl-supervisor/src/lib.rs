//! Supervision of one external worker process.
//!
//! [`WorkerController`] launches the worker, feeds it framed records and
//! control directives, correlates asynchronous flush acknowledgments by
//! token, streams state in and out, and decides liveness from the OS
//! process status plus the error stream's end-of-stream.

pub mod config;
pub mod control;
pub mod controller;
pub mod error;
pub mod error_buffer;
pub mod error_reader;
pub mod flush;
pub mod handshake;
pub mod lifecycle;
pub mod liveness;
mod output_reader;
mod shared;
pub mod state;
pub mod stats;

pub use config::{parse_duration, ControllerConfig, ReadinessPolicy, DEFAULT_LIVENESS_GRACE};
pub use control::{
    parse_flush_directive, ControlMessage, FlushAck, FlushParams, ReadyAnnouncement,
    CONTROL_END_OF_INPUT, CONTROL_FLUSH, CONTROL_FLUSH_ACK, CONTROL_PERSIST, CONTROL_READY,
};
pub use controller::WorkerController;
pub use error::{Result, SupervisorError};
pub use error_buffer::ErrorBuffer;
pub use error_reader::{classify_line, ErrorLine, WorkerLogLevel};
pub use flush::{FlushCoordinator, FlushHandle, FlushOutcome, FlushState};
pub use handshake::{validate_announcement, ReadyOutcome, PROTOCOL_NAME, PROTOCOL_VERSION};
pub use lifecycle::{Lifecycle, WorkerState};
pub use liveness::{EndOfStream, LivenessMonitor};
pub use shared::ExitHook;
pub use state::{StateSink, WorkerEvent};
pub use stats::{ReaderStats, StatsSnapshot};
