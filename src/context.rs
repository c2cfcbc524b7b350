//! Capture context: one per monitored stream or entity.
//!
//! Binds the target span, attribute key, charset and buffer. The binding is
//! immutable; the buffer sits behind a mutex so a completion thread that did
//! not do the reads still observes every byte appended before it finalizes.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error};

use crate::buffer::BodyBuffer;
use crate::metrics;
use crate::policy::{BodyKind, Charset};
use crate::span::{self, AttributeKey, SharedSpan};

/// Lifecycle state of a capture context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Registered, nothing observed yet.
    Attached,
    /// At least one transfer was observed.
    Accumulating,
    /// Rendered (or abandoned); further signals are no-ops.
    Finalized,
}

impl CaptureState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => CaptureState::Attached,
            1 => CaptureState::Accumulating,
            _ => CaptureState::Finalized,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            CaptureState::Attached => 0,
            CaptureState::Accumulating => 1,
            CaptureState::Finalized => 2,
        }
    }
}

/// Why a context was finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeReason {
    /// End-of-stream observed on a read.
    EndOfStream,
    /// Stream or writer closed.
    Closed,
    /// Async processing completed.
    AsyncComplete,
    /// Async processing failed or was cancelled.
    AsyncError,
    /// Remainder was drained at the request boundary.
    ForcedDrain,
    /// The owning wrapper went away before completion.
    Dropped,
}

impl FinalizeReason {
    /// Label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalizeReason::EndOfStream => "eof",
            FinalizeReason::Closed => "close",
            FinalizeReason::AsyncComplete => "async_complete",
            FinalizeReason::AsyncError => "async_error",
            FinalizeReason::ForcedDrain => "forced_drain",
            FinalizeReason::Dropped => "dropped",
        }
    }
}

/// Data observed by one intercepted operation.
#[derive(Debug, Clone, Copy)]
pub enum Transfer<'a> {
    /// Bytes read or written.
    Bytes(&'a [u8]),
    /// Text read or written.
    Text(&'a str),
}

/// Result of a successful finalize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finalized {
    /// Rendered body, `None` if decoding failed.
    pub body: Option<String>,
    /// Whether the body hit the size cap.
    pub truncated: bool,
}

/// Binding of one stream/entity to its span attribute and buffer.
pub struct CaptureContext {
    span: SharedSpan,
    attribute_key: AttributeKey,
    charset: Charset,
    buffer: Mutex<BodyBuffer>,
    state: AtomicU8,
}

impl CaptureContext {
    /// Creates a context with a fresh buffer.
    pub fn new(
        span: SharedSpan,
        attribute_key: AttributeKey,
        charset: Charset,
        kind: BodyKind,
        max_size: usize,
        capacity: usize,
    ) -> Self {
        Self {
            span,
            attribute_key,
            charset,
            buffer: Mutex::new(BodyBuffer::new(kind, max_size, capacity)),
            state: AtomicU8::new(CaptureState::Attached.as_u8()),
        }
    }

    /// Convenience constructor returning an `Arc`.
    pub fn shared(
        span: SharedSpan,
        attribute_key: AttributeKey,
        charset: Charset,
        kind: BodyKind,
        max_size: usize,
    ) -> Arc<Self> {
        Arc::new(Self::new(span, attribute_key, charset, kind, max_size, 0))
    }

    fn lock(&self) -> MutexGuard<'_, BodyBuffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Target span.
    pub fn span(&self) -> &SharedSpan {
        &self.span
    }

    /// Attribute the body is written to.
    pub fn attribute_key(&self) -> &AttributeKey {
        &self.attribute_key
    }

    /// Charset used at render time.
    pub fn charset(&self) -> Charset {
        self.charset
    }

    /// Unit kind the buffer accepts.
    pub fn kind(&self) -> BodyKind {
        self.lock().kind()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CaptureState {
        CaptureState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the context has been finalized.
    pub fn is_finalized(&self) -> bool {
        self.state() == CaptureState::Finalized
    }

    /// Units captured so far.
    pub fn captured_len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the buffer hit the cap.
    pub fn is_truncated(&self) -> bool {
        self.lock().is_truncated()
    }

    /// Appends an observed transfer.
    ///
    /// Returns the number of units kept. Transfers whose unit does not match
    /// the buffer kind are ignored: a text reader layered over a captured
    /// byte stream must not capture the same payload a second time.
    pub fn record(&self, transfer: Transfer<'_>) -> usize {
        if self.is_finalized() {
            return 0;
        }
        let mut buffer = self.lock();
        // Re-check under the lock so nothing lands after the final render.
        if self.is_finalized() {
            return 0;
        }
        let kept = match transfer {
            Transfer::Bytes(bytes) if bytes.is_empty() => return 0,
            Transfer::Text(text) if text.is_empty() => return 0,
            Transfer::Bytes(bytes) => buffer.append_bytes(bytes),
            Transfer::Text(text) => buffer.append_text(text),
        };
        drop(buffer);
        let Some(kept) = kept else {
            debug!(
                attribute = %self.attribute_key,
                "Ignoring transfer with a unit that does not match the capture buffer"
            );
            return 0;
        };
        let _ = self.state.compare_exchange(
            CaptureState::Attached.as_u8(),
            CaptureState::Accumulating.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        kept
    }

    /// Renders the buffer and writes it to the span, exactly once.
    ///
    /// Returns `None` if the context was already finalized. Decoding
    /// failures are logged and produce no attribute.
    pub fn finalize(&self, reason: FinalizeReason) -> Option<Finalized> {
        let buffer = self.lock();
        if self.state.swap(CaptureState::Finalized.as_u8(), Ordering::AcqRel)
            == CaptureState::Finalized.as_u8()
        {
            return None;
        }
        let truncated = buffer.is_truncated();
        let rendered = buffer.render(self.charset).map(|text| text.into_owned());
        let len = buffer.len();
        drop(buffer);

        metrics::record_finalized(&self.attribute_key, reason, truncated);
        match rendered {
            Ok(body) => {
                debug!(
                    attribute = %self.attribute_key,
                    reason = reason.as_str(),
                    units = len,
                    truncated,
                    "Captured body"
                );
                span::emit(self.span.as_ref(), &self.attribute_key, body.clone());
                Some(Finalized {
                    body: Some(body),
                    truncated,
                })
            }
            Err(err) => {
                error!(
                    attribute = %self.attribute_key,
                    charset = self.charset.name(),
                    error = %err,
                    "Failed to decode captured body; attribute omitted"
                );
                metrics::record_decode_failure(&self.attribute_key);
                Some(Finalized {
                    body: None,
                    truncated,
                })
            }
        }
    }

    /// Marks the context finalized without emitting anything.
    pub fn abandon(&self) -> bool {
        let _buffer = self.lock();
        self.state.swap(CaptureState::Finalized.as_u8(), Ordering::AcqRel)
            != CaptureState::Finalized.as_u8()
    }
}

impl fmt::Debug for CaptureContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureContext")
            .field("attribute_key", &self.attribute_key)
            .field("charset", &self.charset)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
