/// Errors that can occur in supervisor operations.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The worker could not be started or did not become ready.
    #[error("worker startup failed: {0}")]
    Startup(String),

    /// The launch facility could not spawn the worker or attach its streams.
    #[error("worker launch failed: {0}")]
    Launch(#[from] workerctl_transport::TransportError),

    /// A stream read or write failed, or the stream is closed.
    #[error("worker I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame-level error on the input stream.
    #[error("frame error: {0}")]
    Frame(#[from] workerctl_frame::FrameError),

    /// The caller's restore routine failed. The state stream was still closed.
    #[error("state restore failed: {0}")]
    Restore(#[source] std::io::Error),

    /// Flush parameters are inconsistent; no token was allocated.
    #[error("invalid flush parameters: {0}")]
    InvalidFlushParams(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration could not be loaded.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SupervisorError {
    /// The worker could not be launched or did not complete its handshake.
    pub fn is_startup(&self) -> bool {
        matches!(self, SupervisorError::Startup(_) | SupervisorError::Launch(_))
    }

    /// A stream operation failed.
    pub fn is_io(&self) -> bool {
        matches!(self, SupervisorError::Io(_) | SupervisorError::Frame(_))
    }

    pub(crate) fn stream_closed(what: &str) -> Self {
        SupervisorError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            format!("{what}: input stream is closed"),
        ))
    }

    pub(crate) fn worker_dead(what: &str) -> Self {
        SupervisorError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            format!("{what}: worker process is dead"),
        ))
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
