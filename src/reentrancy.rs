//! Per-thread call depth tracking.
//!
//! Stream decorators routinely call other intercepted operations of the same
//! category (`read(buf)` delegating to `read(buf, off, len)`, a wrapper
//! reading from the stream it wraps). Only the outermost frame may touch a
//! capture buffer, otherwise the same bytes would be counted twice.

use std::cell::Cell;
use std::marker::PhantomData;

/// Category of intercepted operation. Depth is tracked per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationCategory {
    /// Reads from a byte stream.
    ByteRead,
    /// Writes to a byte stream.
    ByteWrite,
    /// Reads from a text stream.
    CharRead,
    /// Writes to a text stream.
    CharWrite,
    /// Frame polls on an async body.
    BodyPoll,
}

impl OperationCategory {
    const COUNT: usize = 5;

    const fn index(self) -> usize {
        match self {
            Self::ByteRead => 0,
            Self::ByteWrite => 1,
            Self::CharRead => 2,
            Self::CharWrite => 3,
            Self::BodyPoll => 4,
        }
    }

    /// Human-readable name for diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            Self::ByteRead => "byte_read",
            Self::ByteWrite => "byte_write",
            Self::CharRead => "char_read",
            Self::CharWrite => "char_write",
            Self::BodyPoll => "body_poll",
        }
    }
}

thread_local! {
    static DEPTH: [Cell<u32>; OperationCategory::COUNT] =
        const { [const { Cell::new(0) }; OperationCategory::COUNT] };
}

/// Increments the depth for `category` on this thread and returns the new
/// value; `1` means the caller is the outermost frame.
pub fn enter(category: OperationCategory) -> u32 {
    DEPTH.with(|depth| {
        let cell = &depth[category.index()];
        let next = cell.get().saturating_add(1);
        cell.set(next);
        next
    })
}

/// Decrements the depth for `category` and returns the new value.
///
/// An unmatched exit leaves the counter at zero.
pub fn exit(category: OperationCategory) -> u32 {
    DEPTH.with(|depth| {
        let cell = &depth[category.index()];
        let next = cell.get().saturating_sub(1);
        cell.set(next);
        next
    })
}

/// Current depth for `category` on this thread.
pub fn depth(category: OperationCategory) -> u32 {
    DEPTH.with(|depth| depth[category.index()].get())
}

/// Forces the depth for `category` back to zero.
pub fn reset(category: OperationCategory) {
    DEPTH.with(|depth| depth[category.index()].set(0));
}

/// RAII frame: enters on construction, exits on drop.
///
/// Not `Send`: the exit must happen on the thread that entered.
#[derive(Debug)]
pub struct CallDepthGuard {
    category: OperationCategory,
    depth: u32,
    _not_send: PhantomData<*const ()>,
}

impl CallDepthGuard {
    /// Enters `category` on the current thread.
    #[must_use]
    pub fn enter(category: OperationCategory) -> Self {
        Self {
            category,
            depth: enter(category),
            _not_send: PhantomData,
        }
    }

    /// Depth observed at entry.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Whether this is the outermost frame of its category.
    pub fn is_outermost(&self) -> bool {
        self.depth == 1
    }

    /// Category of this frame.
    pub fn category(&self) -> OperationCategory {
        self.category
    }
}

impl Drop for CallDepthGuard {
    fn drop(&mut self) {
        exit(self.category);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_exit_pairs() {
        let cat = OperationCategory::ByteRead;
        reset(cat);
        assert_eq!(enter(cat), 1);
        assert_eq!(enter(cat), 2);
        assert_eq!(exit(cat), 1);
        assert_eq!(exit(cat), 0);
    }

    #[test]
    fn test_unmatched_exit_clamps_at_zero() {
        let cat = OperationCategory::CharWrite;
        reset(cat);
        assert_eq!(exit(cat), 0);
        assert_eq!(exit(cat), 0);
        assert_eq!(enter(cat), 1);
        exit(cat);
    }

    #[test]
    fn test_categories_are_independent() {
        reset(OperationCategory::ByteRead);
        reset(OperationCategory::ByteWrite);
        let read = CallDepthGuard::enter(OperationCategory::ByteRead);
        let write = CallDepthGuard::enter(OperationCategory::ByteWrite);
        assert!(read.is_outermost());
        assert!(write.is_outermost());
        drop(write);
        drop(read);
        assert_eq!(depth(OperationCategory::ByteRead), 0);
    }

    #[test]
    fn test_guard_nesting() {
        let cat = OperationCategory::BodyPoll;
        reset(cat);
        let outer = CallDepthGuard::enter(cat);
        {
            let inner = CallDepthGuard::enter(cat);
            assert!(!inner.is_outermost());
            assert_eq!(inner.depth(), 2);
        }
        assert!(outer.is_outermost());
        drop(outer);
        assert_eq!(depth(cat), 0);
    }

    #[test]
    fn test_depth_is_thread_local() {
        let cat = OperationCategory::CharRead;
        reset(cat);
        let _guard = CallDepthGuard::enter(cat);
        let other = std::thread::spawn(move || enter(cat)).join().unwrap();
        assert_eq!(other, 1);
        assert_eq!(depth(cat), 1);
    }
}
