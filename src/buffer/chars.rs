//! Char-oriented bounded buffer for text readers and writers.

/// Text accumulator capped at `max_size` chars.
#[derive(Debug, Clone)]
pub struct BoundedCharBuffer {
    data: String,
    chars: usize,
    max_size: usize,
    truncated: bool,
}

impl BoundedCharBuffer {
    /// Creates an empty buffer.
    pub fn new(max_size: usize) -> Self {
        Self::with_capacity(max_size, 0)
    }

    /// Creates an empty buffer with an initial byte allocation.
    pub fn with_capacity(max_size: usize, capacity: usize) -> Self {
        Self {
            data: String::with_capacity(capacity.min(max_size)),
            chars: 0,
            max_size,
            truncated: false,
        }
    }

    /// Appends as many chars of `text` as fit and returns the number kept.
    pub fn append(&mut self, text: &str) -> usize {
        let room = self.remaining();
        let mut kept = 0;
        let mut end = 0;
        for (idx, ch) in text.char_indices() {
            if kept == room {
                self.truncated = true;
                break;
            }
            kept += 1;
            end = idx + ch.len_utf8();
        }
        self.data.push_str(&text[..end]);
        self.chars += kept;
        kept
    }

    /// Appends `len` chars of `chars` starting at `offset`.
    pub fn append_chars(&mut self, chars: &[char], offset: usize, len: usize) -> usize {
        let start = offset.min(chars.len());
        let end = start.saturating_add(len).min(chars.len());
        let text: String = chars[start..end].iter().collect();
        self.append(&text)
    }

    /// Appends one char.
    pub fn push(&mut self, ch: char) -> bool {
        if self.remaining() == 0 {
            self.truncated = true;
            return false;
        }
        self.data.push(ch);
        self.chars += 1;
        true
    }

    /// Number of chars held.
    pub fn len(&self) -> usize {
        self.chars
    }

    /// Returns `true` when nothing has been captured.
    pub fn is_empty(&self) -> bool {
        self.chars == 0
    }

    /// Capacity limit in chars.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Chars that can still be appended.
    pub fn remaining(&self) -> usize {
        self.max_size.saturating_sub(self.chars)
    }

    /// Whether any append was cut short.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Captured text.
    pub fn as_str(&self) -> &str {
        &self.data
    }
}
