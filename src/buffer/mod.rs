//! Size-capped capture buffers.
//!
//! Two variants share one contract: [`BoundedByteBuffer`] for raw byte
//! streams and [`BoundedCharBuffer`] for text streams. Both keep at most
//! `max_size` units, flag truncation once, and never error on overflow.

pub mod bytes;
pub mod chars;

pub use self::bytes::BoundedByteBuffer;
pub use self::chars::BoundedCharBuffer;

use std::borrow::Cow;

use crate::error::Result;
use crate::policy::{BodyKind, Charset};

/// Buffer owned by a capture context; the variant is fixed at attach time.
#[derive(Debug, Clone)]
pub enum BodyBuffer {
    /// Raw bytes, decoded with the context charset at render time.
    Bytes(BoundedByteBuffer),
    /// Already-decoded text.
    Chars(BoundedCharBuffer),
}

impl BodyBuffer {
    /// Creates an empty buffer of the given kind.
    pub fn new(kind: BodyKind, max_size: usize, capacity: usize) -> Self {
        match kind {
            BodyKind::Bytes => BodyBuffer::Bytes(BoundedByteBuffer::with_capacity(max_size, capacity)),
            BodyKind::Chars => BodyBuffer::Chars(BoundedCharBuffer::with_capacity(max_size, capacity)),
        }
    }

    /// Unit kind this buffer accepts.
    pub fn kind(&self) -> BodyKind {
        match self {
            BodyBuffer::Bytes(_) => BodyKind::Bytes,
            BodyBuffer::Chars(_) => BodyKind::Chars,
        }
    }

    /// Appends bytes; ignored (returns `None`) for char buffers.
    pub fn append_bytes(&mut self, bytes: &[u8]) -> Option<usize> {
        match self {
            BodyBuffer::Bytes(buffer) => Some(buffer.append(bytes)),
            BodyBuffer::Chars(_) => None,
        }
    }

    /// Appends text; ignored (returns `None`) for byte buffers.
    pub fn append_text(&mut self, text: &str) -> Option<usize> {
        match self {
            BodyBuffer::Bytes(_) => None,
            BodyBuffer::Chars(buffer) => Some(buffer.append(text)),
        }
    }

    /// Units held.
    pub fn len(&self) -> usize {
        match self {
            BodyBuffer::Bytes(buffer) => buffer.len(),
            BodyBuffer::Chars(buffer) => buffer.len(),
        }
    }

    /// Returns `true` when nothing has been captured.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Units that still fit.
    pub fn remaining(&self) -> usize {
        match self {
            BodyBuffer::Bytes(buffer) => buffer.remaining(),
            BodyBuffer::Chars(buffer) => buffer.remaining(),
        }
    }

    /// Whether any append was cut short.
    pub fn is_truncated(&self) -> bool {
        match self {
            BodyBuffer::Bytes(buffer) => buffer.is_truncated(),
            BodyBuffer::Chars(buffer) => buffer.is_truncated(),
        }
    }

    /// Renders the content as a string. `charset` only applies to bytes.
    pub fn render(&self, charset: Charset) -> Result<Cow<'_, str>> {
        match self {
            BodyBuffer::Bytes(buffer) => buffer.render(charset),
            BodyBuffer::Chars(buffer) => Ok(Cow::Borrowed(buffer.as_str())),
        }
    }
}
