//! Field encoding for `RECORD` frame payloads.
//!
//! ```text
//! field count (u32 LE) | len0 (u32 LE) | field0 bytes | len1 (u32 LE) | ...
//! ```
//!
//! Fields are UTF-8 strings. Zero fields and empty fields are both legal.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{FrameError, Result};

const LEN_SIZE: usize = 4;

/// Encode an ordered list of fields into `dst`.
pub fn encode_record<S: AsRef<str>>(fields: &[S], dst: &mut BytesMut) -> Result<()> {
    let count = u32::try_from(fields.len())
        .map_err(|_| FrameError::MalformedRecord(format!("too many fields: {}", fields.len())))?;

    let body: usize = fields.iter().map(|f| LEN_SIZE + f.as_ref().len()).sum();
    dst.reserve(LEN_SIZE + body);
    dst.put_u32_le(count);

    for field in fields {
        let bytes = field.as_ref().as_bytes();
        let len = u32::try_from(bytes.len()).map_err(|_| FrameError::PayloadTooLarge {
            size: bytes.len(),
            max: u32::MAX as usize,
        })?;
        dst.put_u32_le(len);
        dst.put_slice(bytes);
    }
    Ok(())
}

/// Decode a `RECORD` payload back into its fields.
///
/// Rejects truncated payloads, trailing bytes and non-UTF-8 fields.
pub fn decode_record(mut payload: &[u8]) -> Result<Vec<String>> {
    let count = take_len(&mut payload, "field count")?;

    // Each field needs at least its length prefix.
    if count.saturating_mul(LEN_SIZE) > payload.len() {
        return Err(FrameError::MalformedRecord(format!(
            "{count} fields announced but only {} bytes follow",
            payload.len()
        )));
    }

    let mut fields = Vec::with_capacity(count);
    for index in 0..count {
        let len = take_len(&mut payload, "field length")?;
        if payload.len() < len {
            return Err(FrameError::MalformedRecord(format!(
                "field {index} truncated ({} of {len} bytes)",
                payload.len()
            )));
        }
        let field = std::str::from_utf8(&payload[..len]).map_err(|err| {
            FrameError::MalformedRecord(format!("field {index} is not UTF-8: {err}"))
        })?;
        fields.push(field.to_string());
        payload.advance(len);
    }

    if !payload.is_empty() {
        return Err(FrameError::MalformedRecord(format!(
            "{} trailing bytes",
            payload.len()
        )));
    }
    Ok(fields)
}

fn take_len(payload: &mut &[u8], what: &str) -> Result<usize> {
    if payload.len() < LEN_SIZE {
        return Err(FrameError::MalformedRecord(format!("missing {what}")));
    }
    Ok(payload.get_u32_le() as usize)
}
