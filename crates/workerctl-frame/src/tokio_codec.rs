//! `tokio_util` codec over the same wire format (requires `async` feature).

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::codec::{decode_frame, encode_frame, resync, Frame, FrameConfig};
use crate::error::FrameError;

/// Frame codec for `FramedRead`/`FramedWrite` over worker pipes.
///
/// Corrupt headers are skipped (see [`crate::codec::resync`]) and counted
/// instead of terminating the stream.
#[derive(Debug, Clone, Default)]
pub struct FrameCodec {
    config: FrameConfig,
    malformed: u64,
}

impl FrameCodec {
    pub fn new(config: FrameConfig) -> Self {
        Self {
            config,
            malformed: 0,
        }
    }

    /// Number of corrupt headers skipped so far.
    pub fn malformed(&self) -> u64 {
        self.malformed
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        loop {
            match decode_frame(src, self.config.max_payload_size) {
                Ok(frame) => return Ok(frame),
                Err(err) if err.is_recoverable() => {
                    let skipped = resync(src);
                    self.malformed += 1;
                    warn!(%err, skipped, "skipping malformed frame");
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        if item.payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: item.payload.len(),
                max: self.config.max_payload_size,
            });
        }
        encode_frame(item.channel, &item.payload, dst)
    }
}
