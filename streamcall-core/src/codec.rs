use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Compressed-flag byte plus big-endian u32 length.
pub const FRAME_HEADER_LEN: usize = 5;
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;
/// Largest payload the length field can describe.
pub const MAX_FRAME_PAYLOAD: usize = u32::MAX as usize;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("failed to serialize message: {0}")]
    Serialize(String),
    #[error("failed to deserialize message: {0}")]
    Deserialize(String),
    #[error("incomplete frame: expected {expected} bytes, got {actual}")]
    Incomplete { expected: usize, actual: usize },
    #[error("frame carries {0} bytes after the message")]
    TrailingBytes(usize),
    #[error("message of {size} bytes exceeds limit of {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("message is compressed but no decompressor is configured")]
    Compressed,
    #[error("invalid compressed flag {0}")]
    InvalidFlag(u8),
}

/// One decoded length-prefixed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthPrefixed {
    pub compressed: bool,
    pub payload: Bytes,
}

pub fn encode_message<T: Serialize>(message: &T) -> Result<Bytes, CodecError> {
    let json = serde_json::to_vec(message).map_err(|e| CodecError::Serialize(e.to_string()))?;
    Ok(Bytes::from(json))
}

pub fn decode_message<T: DeserializeOwned>(data: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(data).map_err(|e| CodecError::Deserialize(e.to_string()))
}

/// Prefix an uncompressed payload with the 5-byte message header. Payloads longer
/// than `max_message_size`, or than the u32 length field can carry, are rejected.
pub fn encode_frame(payload: &[u8], max_message_size: usize) -> Result<Bytes, CodecError> {
    let limit = max_message_size.min(MAX_FRAME_PAYLOAD);
    let len = match u32::try_from(payload.len()) {
        Ok(len) if payload.len() <= limit => len,
        _ => {
            return Err(CodecError::TooLarge {
                size: payload.len(),
                limit,
            })
        }
    };
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_u8(0);
    buf.put_u32(len);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Serialize and frame a message in one step.
pub fn encode_message_frame<T: Serialize>(message: &T) -> Result<Bytes, CodecError> {
    let payload = encode_message(message)?;
    encode_frame(&payload, MAX_FRAME_PAYLOAD)
}

/// Split a buffer holding exactly one length-prefixed message.
pub fn decode_frame(frame: &Bytes, max_message_size: usize) -> Result<LengthPrefixed, CodecError> {
    if frame.len() < FRAME_HEADER_LEN {
        return Err(CodecError::Incomplete {
            expected: FRAME_HEADER_LEN,
            actual: frame.len(),
        });
    }

    let compressed = match frame[0] {
        0 => false,
        1 => true,
        other => return Err(CodecError::InvalidFlag(other)),
    };
    let len = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize;
    if len > max_message_size {
        return Err(CodecError::TooLarge {
            size: len,
            limit: max_message_size,
        });
    }

    let total = FRAME_HEADER_LEN + len;
    if frame.len() < total {
        return Err(CodecError::Incomplete {
            expected: total,
            actual: frame.len(),
        });
    }
    if frame.len() > total {
        return Err(CodecError::TrailingBytes(frame.len() - total));
    }

    Ok(LengthPrefixed {
        compressed,
        payload: frame.slice(FRAME_HEADER_LEN..total),
    })
}

/// Unframe and deserialize a message. Compressed messages are rejected.
pub fn decode_message_frame<T: DeserializeOwned>(
    frame: &Bytes,
    max_message_size: usize,
) -> Result<T, CodecError> {
    let message = decode_frame(frame, max_message_size)?;
    if message.compressed {
        return Err(CodecError::Compressed);
    }
    decode_message(&message.payload)
}
