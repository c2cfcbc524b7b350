//! Byte-oriented bounded buffer.

use std::borrow::Cow;

use crate::error::Result;
use crate::policy::Charset;

/// Byte accumulator that never grows beyond `max_size`.
///
/// Appends past the cap keep the prefix that fits and set the truncated
/// flag; the rest is dropped without error.
#[derive(Debug, Clone)]
pub struct BoundedByteBuffer {
    data: Vec<u8>,
    max_size: usize,
    truncated: bool,
}

impl BoundedByteBuffer {
    /// Creates an empty buffer.
    pub fn new(max_size: usize) -> Self {
        Self::with_capacity(max_size, 0)
    }

    /// Creates an empty buffer with an initial allocation, capped at `max_size`.
    pub fn with_capacity(max_size: usize, capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity.min(max_size)),
            max_size,
            truncated: false,
        }
    }

    /// Appends as much of `bytes` as fits and returns the number kept.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let room = self.remaining();
        if bytes.len() > room {
            self.truncated = true;
        }
        let take = bytes.len().min(room);
        self.data.extend_from_slice(&bytes[..take]);
        take
    }

    /// Appends `len` bytes of `bytes` starting at `offset`.
    ///
    /// Out-of-range windows are clamped to the slice.
    pub fn append_range(&mut self, bytes: &[u8], offset: usize, len: usize) -> usize {
        let start = offset.min(bytes.len());
        let end = start.saturating_add(len).min(bytes.len());
        self.append(&bytes[start..end])
    }

    /// Appends a single byte.
    pub fn push(&mut self, byte: u8) -> bool {
        self.append(&[byte]) == 1
    }

    /// Number of bytes held.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` when nothing has been captured.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Capacity limit.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Bytes that can still be appended.
    pub fn remaining(&self) -> usize {
        self.max_size.saturating_sub(self.data.len())
    }

    /// Whether any append was cut short.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Captured bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Decodes the captured bytes with `charset`.
    pub fn render(&self, charset: Charset) -> Result<Cow<'_, str>> {
        charset.decode(&self.data, self.truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE_TO_TEN: &[u8] = b"0123456789";

    #[test]
    fn test_write_same_size_as_buffer() {
        let mut buffer = BoundedByteBuffer::new(10);
        assert_eq!(buffer.append(ONE_TO_TEN), 10);
        assert_eq!(buffer.len(), 10);
        assert!(!buffer.is_truncated());

        assert_eq!(buffer.append(b"01234"), 0);
        assert_eq!(buffer.len(), 10);
        assert!(buffer.is_truncated());
        assert_eq!(buffer.render(Charset::utf8()).unwrap(), "0123456789");
    }

    #[test]
    fn test_write_smaller_than_buffer() {
        let mut buffer = BoundedByteBuffer::new(15);
        buffer.append(ONE_TO_TEN);
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.append(b"0123456"), 5);
        assert_eq!(buffer.len(), 15);
        assert_eq!(buffer.as_bytes(), b"012345678901234");
    }

    #[test]
    fn test_single_bytes() {
        let mut buffer = BoundedByteBuffer::new(5);
        for b in b"01234" {
            assert!(buffer.push(*b));
        }
        assert!(!buffer.push(b'5'));
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.append(b"01234"), 0);
        assert_eq!(buffer.as_bytes(), b"01234");
    }

    #[test]
    fn test_append_range_clamps() {
        let mut buffer = BoundedByteBuffer::new(16);
        assert_eq!(buffer.append_range(b"hello world", 6, 5), 5);
        assert_eq!(buffer.append_range(b"abc", 2, 10), 1);
        assert_eq!(buffer.append_range(b"abc", 9, 1), 0);
        assert_eq!(buffer.as_bytes(), b"worldc");
    }

    #[test]
    fn test_truncated_render() {
        let mut buffer = BoundedByteBuffer::new(4);
        buffer.append(b"hello");
        assert!(buffer.is_truncated());
        assert_eq!(buffer.render(Charset::utf8()).unwrap(), "hell");
    }

    #[test]
    fn test_capacity_hint_is_capped() {
        let buffer = BoundedByteBuffer::with_capacity(8, 1 << 30);
        assert!(buffer.is_empty());
        assert_eq!(buffer.max_size(), 8);
        assert_eq!(buffer.remaining(), 8);
    }
}
