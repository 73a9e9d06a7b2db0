//! Incremental decoder for a MessagePack byte stream.
//!
//! DESIGN
//! ======
//! Bytes arrive in arbitrary chunks. They are appended to one buffer and
//! complete values are cut from its front; a partially received value stays
//! buffered until the next `push`. A value that is complete but malformed
//! poisons the unpacker: everything decoded before it is still handed out,
//! the error is reported once, and every later call reports `Poisoned`.
//!
//! Before decoding, the front value is measured by walking its markers and
//! length headers only; string, blob and extension payloads are jumped over.
//! A partial value records the buffer length it needs at least, and nothing
//! is measured again until that many bytes are buffered. A large chunk
//! arriving in small reads is therefore decoded once, not once per read.

use std::io::Cursor;

use bytes::{Buf, BytesMut};
use rmp::Marker;
use rmpv::Value;

use crate::{Call, CodecError, Frame};

/// A message type that can be built from one decoded MessagePack value.
pub trait Message: Sized {
    /// Convert a complete value into a typed message.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] when the value has the wrong shape.
    fn from_value(value: Value) -> Result<Self, CodecError>;
}

impl Message for Frame {
    fn from_value(value: Value) -> Result<Self, CodecError> {
        crate::frame_from_value(value)
    }
}

impl Message for Call {
    fn from_value(value: Value) -> Result<Self, CodecError> {
        crate::call_from_value(value)
    }
}

/// Resumable decoder yielding complete messages from a chunked byte stream.
#[derive(Debug)]
pub struct StreamUnpacker<M = Frame> {
    buf: BytesMut,
    /// Buffer length below which the front value cannot be complete.
    need: usize,
    state: State,
    _message: std::marker::PhantomData<fn() -> M>,
}

#[derive(Debug)]
enum State {
    Healthy,
    /// A decode failure has not been reported to the caller yet.
    Failing(CodecError),
    Poisoned,
}

impl<M: Message> StreamUnpacker<M> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            need: 0,
            state: State::Healthy,
            _message: std::marker::PhantomData,
        }
    }

    /// Append raw input. Nothing is decoded until [`Self::next_message`].
    pub fn push(&mut self, bytes: &[u8]) {
        if matches!(self.state, State::Healthy) {
            self.buf.extend_from_slice(bytes);
        }
    }

    /// Number of buffered bytes not yet consumed by a complete message.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Cut the next complete message from the buffer.
    ///
    /// Returns `Ok(None)` when the buffer holds only a partial message.
    ///
    /// # Errors
    ///
    /// Returns the decode failure of a malformed message once, then
    /// [`CodecError::Poisoned`] on every following call.
    pub fn next_message(&mut self) -> Result<Option<M>, CodecError> {
        match std::mem::replace(&mut self.state, State::Poisoned) {
            State::Healthy => self.state = State::Healthy,
            State::Failing(err) => return Err(err),
            State::Poisoned => return Err(CodecError::Poisoned),
        }
        if self.buf.is_empty() || self.buf.len() < self.need {
            return Ok(None);
        }

        let len = match measure(&self.buf) {
            Ok(Extent::Complete(len)) => len,
            Ok(Extent::Partial(need)) => {
                self.need = need;
                return Ok(None);
            }
            Err(err) => return Err(self.poison(err)),
        };
        self.need = 0;

        let mut cursor = Cursor::new(&self.buf[..len]);
        let value = match rmpv::decode::read_value(&mut cursor) {
            Ok(value) => value,
            Err(err) => return Err(self.poison(err.into())),
        };
        self.buf.advance(len);

        M::from_value(value).map(Some).map_err(|err| self.poison(err))
    }

    /// Append `bytes` and return every message that is now complete, in order.
    ///
    /// # Errors
    ///
    /// When a malformed message is found after some good ones, the good ones
    /// are returned and the failure is reported by the next call. A failure
    /// with nothing decoded before it is returned immediately.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<M>, CodecError> {
        self.push(bytes);
        let mut out = Vec::new();
        loop {
            match self.next_message() {
                Ok(Some(message)) => out.push(message),
                Ok(None) => return Ok(out),
                Err(err) if out.is_empty() => return Err(err),
                Err(err) => {
                    self.state = State::Failing(err);
                    return Ok(out);
                }
            }
        }
    }

    fn poison(&mut self, err: CodecError) -> CodecError {
        self.buf.clear();
        self.need = 0;
        self.state = State::Poisoned;
        err
    }
}

impl<M: Message> Default for StreamUnpacker<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Size of the value at the front of a buffer.
#[derive(Debug, PartialEq, Eq)]
enum Extent {
    /// The whole value is buffered and spans this many bytes.
    Complete(usize),
    /// The value is cut short; the buffer must reach at least this length.
    Partial(usize),
}

/// What follows a marker byte.
enum Shape {
    /// A fixed number of data bytes.
    Fixed(usize),
    /// A big-endian length of `width` bytes, then that many payload bytes
    /// plus `extra` (the type byte of an extension).
    Sized { width: usize, extra: usize },
    /// A known number of nested values.
    Items(u64),
    /// A big-endian count of `width` bytes, then `per` values per count.
    Counted { width: usize, per: u64 },
}

fn shape(marker: Marker) -> Result<Shape, CodecError> {
    Ok(match marker {
        Marker::FixPos(_) | Marker::FixNeg(_) | Marker::Null | Marker::True | Marker::False => {
            Shape::Fixed(0)
        }
        Marker::U8 | Marker::I8 => Shape::Fixed(1),
        Marker::U16 | Marker::I16 => Shape::Fixed(2),
        Marker::U32 | Marker::I32 | Marker::F32 => Shape::Fixed(4),
        Marker::U64 | Marker::I64 | Marker::F64 => Shape::Fixed(8),
        Marker::FixStr(len) => Shape::Fixed(usize::from(len)),
        Marker::FixExt1 => Shape::Fixed(2),
        Marker::FixExt2 => Shape::Fixed(3),
        Marker::FixExt4 => Shape::Fixed(5),
        Marker::FixExt8 => Shape::Fixed(9),
        Marker::FixExt16 => Shape::Fixed(17),
        Marker::Str8 | Marker::Bin8 => Shape::Sized { width: 1, extra: 0 },
        Marker::Str16 | Marker::Bin16 => Shape::Sized { width: 2, extra: 0 },
        Marker::Str32 | Marker::Bin32 => Shape::Sized { width: 4, extra: 0 },
        Marker::Ext8 => Shape::Sized { width: 1, extra: 1 },
        Marker::Ext16 => Shape::Sized { width: 2, extra: 1 },
        Marker::Ext32 => Shape::Sized { width: 4, extra: 1 },
        Marker::FixArray(len) => Shape::Items(u64::from(len)),
        Marker::FixMap(len) => Shape::Items(2 * u64::from(len)),
        Marker::Array16 => Shape::Counted { width: 2, per: 1 },
        Marker::Array32 => Shape::Counted { width: 4, per: 1 },
        Marker::Map16 => Shape::Counted { width: 2, per: 2 },
        Marker::Map32 => Shape::Counted { width: 4, per: 2 },
        Marker::Reserved => return Err(CodecError::Malformed("reserved marker 0xc1")),
    })
}

/// Measure the first value of `buf` from its headers alone.
fn measure(buf: &[u8]) -> Result<Extent, CodecError> {
    let mut pos = 0_usize;
    let mut pending = 1_u64;

    while pending > 0 {
        let Some(&byte) = buf.get(pos) else {
            return Ok(Extent::Partial(pos + 1));
        };
        pos += 1;
        pending -= 1;

        match shape(Marker::from_u8(byte))? {
            Shape::Fixed(len) => pos = pos.saturating_add(len),
            Shape::Sized { width, extra } => {
                let Some(len) = read_be(buf, pos, width) else {
                    return Ok(Extent::Partial(pos + width));
                };
                let len = usize::try_from(len).unwrap_or(usize::MAX);
                pos = pos.saturating_add(width).saturating_add(len).saturating_add(extra);
            }
            Shape::Items(count) => pending += count,
            Shape::Counted { width, per } => {
                let Some(count) = read_be(buf, pos, width) else {
                    return Ok(Extent::Partial(pos + width));
                };
                pos += width;
                pending = pending.saturating_add(count.saturating_mul(per));
            }
        }
        if pos > buf.len() {
            return Ok(Extent::Partial(pos));
        }
    }
    Ok(Extent::Complete(pos))
}

fn read_be(buf: &[u8], pos: usize, width: usize) -> Option<u64> {
    let bytes = buf.get(pos..pos + width)?;
    Some(bytes.iter().fold(0, |acc, byte| (acc << 8) | u64::from(*byte)))
}

#[cfg(test)]
#[path = "unpacker_test.rs"]
mod tests;
