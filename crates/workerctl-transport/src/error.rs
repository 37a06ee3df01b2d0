use std::path::PathBuf;

/// Errors that can occur while launching a worker process.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The executable could not be spawned.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },

    /// A standard stream was not piped back from the child.
    #[error("worker {0} pipe is not attached")]
    MissingPipe(&'static str),

    /// An I/O error occurred on the process handle.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
