//! Length-prefixed message framing for worker process streams.
//!
//! Both the worker's input stream and its output stream carry frames:
//! - A 2-byte magic number ("WC") for stream synchronization
//! - A 4-byte little-endian payload length
//! - A 2-byte little-endian channel ID separating records, control
//!   directives, results and state bytes
//!
//! A corrupt header never wedges a reader: [`FrameReader::recover`] skips
//! ahead to the next magic number.

pub mod channel;
pub mod codec;
pub mod error;
pub mod reader;
pub mod record;
#[cfg(feature = "async")]
pub mod tokio_codec;
pub mod writer;

pub use channel::{channel_name, CONTROL, RECORD, RESULT, STATE};
pub use codec::{
    decode_frame, encode_frame, resync, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
    MAGIC,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use record::{decode_record, encode_record};
#[cfg(feature = "async")]
pub use tokio_codec::FrameCodec;
pub use writer::FrameWriter;
