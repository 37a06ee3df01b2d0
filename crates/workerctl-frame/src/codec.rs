use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Header bytes preceding every payload: magic, length, channel.
pub const HEADER_SIZE: usize = 8;

/// Magic bytes: "WC" (0x57 0x43).
pub const MAGIC: [u8; 2] = [0x57, 0x43];

/// Largest payload accepted unless configured otherwise (16 MiB).
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// One unit on a worker stream: a channel id and its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// See [`crate::channel`].
    pub channel: u16,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(channel: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }

    /// Bytes this frame occupies on the stream.
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Append one frame to `dst`.
///
/// Layout, all integers little-endian:
/// ```text
/// ┌──────────────┬───────────┬──────────┬─────────────────┐
/// │ Magic (2B)   │ Length    │ Channel  │ Payload          │
/// │ 0x57 0x43    │ (4B LE)  │ (2B LE)  │ (Length bytes)   │
/// │ "WC"         │          │          │                  │
/// └──────────────┴───────────┴──────────┴─────────────────┘
/// ```
pub fn encode_frame(channel: u16, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&MAGIC);
    dst.put_u32_le(payload.len() as u32);
    dst.put_u16_le(channel);
    dst.put_slice(payload);
    Ok(())
}

/// Take one complete frame off the front of `src`.
///
/// `Ok(None)` means more bytes are needed. On success the frame's bytes
/// are consumed. On a corrupt
/// header nothing is consumed; call [`resync`] to skip past it.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    if src[0..2] != MAGIC {
        return Err(FrameError::InvalidMagic);
    }

    let payload_len = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;
    let channel = u16::from_le_bytes([src[6], src[7]]);

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Frame { channel, payload }))
}

/// Discard bytes up to the next magic number after the current position.
///
/// The byte at offset 0 is always dropped so a rejected header is never
/// matched again. When no magic is buffered, a trailing first magic byte is
/// kept since its partner may still be in flight. Returns the number of
/// bytes discarded.
pub fn resync(src: &mut BytesMut) -> usize {
    if src.is_empty() {
        return 0;
    }

    let skip = src[1..]
        .windows(MAGIC.len())
        .position(|window| window == MAGIC)
        .map(|pos| pos + 1)
        .unwrap_or_else(|| {
            if src.len() > 1 && src[src.len() - 1] == MAGIC[0] {
                src.len() - 1
            } else {
                src.len()
            }
        });

    src.advance(skip);
    skip
}

/// Per-stream framing settings.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Payloads above this are rejected in both directions.
    pub max_payload_size: usize,
    /// Flush the underlying stream after every frame. Default: true.
    ///
    /// Turn off when the writer sits on a buffered stream and the caller
    /// decides when bytes are pushed out.
    pub flush_each_frame: bool,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            flush_each_frame: true,
        }
    }
}
