/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header contains an invalid magic number.
    #[error("invalid frame magic (expected 0x5743 \"WC\")")]
    InvalidMagic,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream was closed before a complete frame was received.
    #[error("stream closed (incomplete frame)")]
    ConnectionClosed,

    /// A record payload does not follow the field encoding.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// A frame arrived on a channel the receiver does not handle.
    #[error("unexpected frame on channel {0}")]
    UnexpectedChannel(u16),
}

impl FrameError {
    /// True for header corruption that [`crate::FrameReader::recover`] can skip past.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FrameError::InvalidMagic | FrameError::PayloadTooLarge { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
