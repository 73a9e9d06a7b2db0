//! Shared frame model and MessagePack codec for the service RPC transport.
//!
//! This crate owns the wire representation used by the client session engine
//! and by in-process test peers. Every message is a single MessagePack array
//! `[tag, session, [fields...]]`; outgoing calls reuse the same shape with the
//! method number in the tag position.

mod unpacker;

use rmpv::Value;

pub use unpacker::{Message, StreamUnpacker};

/// Wire tag of a [`Frame::Chunk`].
pub const CHUNK_TAG: u64 = 0;
/// Wire tag of a [`Frame::Choke`].
pub const CHOKE_TAG: u64 = 1;
/// Wire tag of a [`Frame::Error`].
pub const ERROR_TAG: u64 = 2;

/// Error returned by the decoding functions and the [`StreamUnpacker`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The raw bytes are not valid MessagePack.
    #[error("failed to decode msgpack value: {0}")]
    Decode(#[from] rmpv::decode::Error),
    /// The value decoded but does not have the `[tag, session, [fields]]` shape.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
    /// The tag does not map to a known [`Frame`] variant.
    #[error("unknown frame tag: {0}")]
    UnknownTag(u64),
    /// Bytes were left over after a complete value in [`decode_frame`] or [`decode_call`].
    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),
    /// An earlier malformed message made the stream unusable.
    #[error("stream unpacker is poisoned by an earlier decode failure")]
    Poisoned,
}

/// A single response message routed to one session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// One unit of streamed payload. `data` is an opaque MessagePack blob.
    Chunk { session: u64, data: Vec<u8> },
    /// Normal end of stream for a session.
    Choke { session: u64 },
    /// Remote failure for a session. Not terminal on its own.
    Error { session: u64, code: i64, message: String },
}

impl Frame {
    /// Session identifier the frame is addressed to.
    #[must_use]
    pub fn session(&self) -> u64 {
        match self {
            Self::Chunk { session, .. } | Self::Choke { session } | Self::Error { session, .. } => {
                *session
            }
        }
    }

    /// Wire tag for this variant.
    #[must_use]
    pub fn tag(&self) -> u64 {
        match self {
            Self::Chunk { .. } => CHUNK_TAG,
            Self::Choke { .. } => CHOKE_TAG,
            Self::Error { .. } => ERROR_TAG,
        }
    }
}

/// An outgoing method invocation opening a new session.
#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    /// Method number taken from the resolved API table.
    pub method: u64,
    /// Session the responses will be routed to.
    pub session: u64,
    /// Positional arguments.
    pub args: Vec<Value>,
}

/// Encode a frame into MessagePack bytes.
#[must_use]
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let fields = match frame {
        Frame::Chunk { data, .. } => vec![Value::Binary(data.clone())],
        Frame::Choke { .. } => Vec::new(),
        Frame::Error { code, message, .. } => {
            vec![Value::from(*code), Value::from(message.as_str())]
        }
    };
    write_envelope(frame.tag(), frame.session(), fields)
}

/// Encode a call into MessagePack bytes.
#[must_use]
pub fn encode_call(call: &Call) -> Vec<u8> {
    write_envelope(call.method, call.session, call.args.clone())
}

/// Decode exactly one complete frame from `bytes`.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for invalid or truncated MessagePack,
/// [`CodecError::Malformed`] / [`CodecError::UnknownTag`] for values with the
/// wrong shape, and [`CodecError::TrailingBytes`] when input remains.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, CodecError> {
    decode_exact(bytes)
}

/// Decode exactly one complete call from `bytes`.
///
/// # Errors
///
/// Same conditions as [`decode_frame`].
pub fn decode_call(bytes: &[u8]) -> Result<Call, CodecError> {
    decode_exact(bytes)
}

fn decode_exact<M: Message>(bytes: &[u8]) -> Result<M, CodecError> {
    let mut cursor = std::io::Cursor::new(bytes);
    let value = rmpv::decode::read_value(&mut cursor)?;
    let used = usize::try_from(cursor.position()).unwrap_or(bytes.len());
    if used < bytes.len() {
        return Err(CodecError::TrailingBytes(bytes.len() - used));
    }
    M::from_value(value)
}

fn write_envelope(head: u64, session: u64, fields: Vec<Value>) -> Vec<u8> {
    let value = Value::Array(vec![
        Value::from(head),
        Value::from(session),
        Value::Array(fields),
    ]);
    let mut out = Vec::new();
    // Writing into a growable Vec<u8> cannot fail.
    let _ = rmpv::encode::write_value(&mut out, &value);
    out
}

/// Split a decoded value into `(head, session, fields)`.
fn split_envelope(value: Value) -> Result<(u64, u64, Vec<Value>), CodecError> {
    let Value::Array(items) = value else {
        return Err(CodecError::Malformed("expected a 3-element array"));
    };
    let [head, session, fields]: [Value; 3] = items
        .try_into()
        .map_err(|_| CodecError::Malformed("expected a 3-element array"))?;
    let head = head
        .as_u64()
        .ok_or(CodecError::Malformed("tag must be an unsigned integer"))?;
    let session = session
        .as_u64()
        .ok_or(CodecError::Malformed("session must be an unsigned integer"))?;
    let Value::Array(fields) = fields else {
        return Err(CodecError::Malformed("fields must be an array"));
    };
    Ok((head, session, fields))
}

fn frame_from_value(value: Value) -> Result<Frame, CodecError> {
    let (tag, session, fields) = split_envelope(value)?;
    match tag {
        CHUNK_TAG => {
            let mut fields = fields.into_iter();
            let data = match fields.next() {
                Some(Value::Binary(data)) => data,
                Some(Value::String(data)) => data.into_bytes(),
                _ => return Err(CodecError::Malformed("chunk payload must be a blob")),
            };
            Ok(Frame::Chunk { session, data })
        }
        CHOKE_TAG => Ok(Frame::Choke { session }),
        ERROR_TAG => {
            let mut fields = fields.into_iter();
            let code = fields
                .next()
                .and_then(|v| v.as_i64())
                .ok_or(CodecError::Malformed("error code must be an integer"))?;
            let message = match fields.next() {
                Some(Value::String(message)) => {
                    String::from_utf8_lossy(message.as_bytes()).into_owned()
                }
                None => String::new(),
                Some(_) => return Err(CodecError::Malformed("error message must be a string")),
            };
            Ok(Frame::Error { session, code, message })
        }
        other => Err(CodecError::UnknownTag(other)),
    }
}

fn call_from_value(value: Value) -> Result<Call, CodecError> {
    let (method, session, args) = split_envelope(value)?;
    Ok(Call { method, session, args })
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
