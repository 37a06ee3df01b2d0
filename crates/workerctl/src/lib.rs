//! Supervision of external worker processes over framed stdio streams.
//!
//! A worker is any program that speaks the workerctl protocol on its
//! standard streams: framed records and control directives on stdin,
//! framed results, acknowledgments and state on stdout, diagnostics on
//! stderr.
//!
//! # Crate Structure
//!
//! - [`transport`]: Process launch and the OS process handle
//! - [`frame`]: Length-prefixed framing with channel multiplexing and record encoding
//! - [`supervisor`]: Process controller, flush coordination and liveness (behind `supervisor` feature)

/// Re-export transport types.
pub mod transport {
    pub use workerctl_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use workerctl_frame::*;
}

/// Re-export supervisor types (requires `supervisor` feature).
#[cfg(feature = "supervisor")]
pub mod supervisor {
    pub use workerctl_supervisor::*;
}
