//! Capturing readers.

use std::io::{self, BufRead, Read};
use std::sync::Arc;

use super::live;
use crate::context::{CaptureContext, FinalizeReason, Finalized, Transfer};
use crate::controller::{self, AttachRequest, CaptureController, OperationFrame};
use crate::reentrancy::OperationCategory;

/// Byte reader that copies everything read into a capture context.
///
/// End-of-stream finalizes the capture. A reader dropped before that
/// finalizes with whatever was read; [`drain_remaining`](Self::drain_remaining)
/// reads the rest first.
pub struct CaptureReader<R> {
    inner: R,
    context: Option<Arc<CaptureContext>>,
}

impl<R> CaptureReader<R> {
    /// Wraps `inner`; `None` passes reads through untouched.
    pub fn new(inner: R, context: Option<Arc<CaptureContext>>) -> Self {
        Self { inner, context }
    }

    /// Wraps `inner` with a context built by `controller`.
    pub fn attach(inner: R, controller: &CaptureController, request: AttachRequest<'_>) -> Self {
        Self::new(inner, controller.context_for(request))
    }

    /// Capture context, if capturing.
    pub fn context(&self) -> Option<&Arc<CaptureContext>> {
        self.context.as_ref()
    }

    /// Underlying reader.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Underlying reader. Reads through it are not captured.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Finalizes as if the stream had been closed.
    pub fn close(&mut self) -> Option<Finalized> {
        live(&self.context)?.finalize(FinalizeReason::Closed)
    }
}

impl<R: Read> CaptureReader<R> {
    /// Reads the unread remainder into the capture and finalizes it.
    pub fn drain_remaining(&mut self) -> Option<Finalized> {
        let context = live(&self.context)?.clone();
        controller::drain_into(&context, &mut self.inner);
        context.finalize(FinalizeReason::ForcedDrain)
    }
}

impl<R: Read> Read for CaptureReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(context) = live(&self.context) else {
            return self.inner.read(buf);
        };
        let frame = OperationFrame::for_context(context.clone(), OperationCategory::ByteRead);
        let n = self.inner.read(buf)?;
        if n == 0 {
            if !buf.is_empty() {
                frame.end_of_stream();
            }
        } else {
            frame.transferred(Transfer::Bytes(&buf[..n]));
        }
        Ok(n)
    }
}

impl<R> Drop for CaptureReader<R> {
    fn drop(&mut self) {
        if let Some(context) = live(&self.context) {
            context.finalize(FinalizeReason::Dropped);
        }
    }
}

/// Line-oriented text reader feeding a char capture buffer.
///
/// Only text returned through [`read_line`](Self::read_line) and
/// [`lines`](Self::lines) is captured.
pub struct CaptureBufReader<R> {
    inner: R,
    context: Option<Arc<CaptureContext>>,
}

impl<R> CaptureBufReader<R> {
    /// Wraps `inner`; the context should be char-oriented.
    pub fn new(inner: R, context: Option<Arc<CaptureContext>>) -> Self {
        Self { inner, context }
    }

    /// Wraps `inner` with a char context built by `controller`.
    pub fn attach(inner: R, controller: &CaptureController, request: AttachRequest<'_>) -> Self {
        Self::new(inner, controller.context_for(request.chars()))
    }

    /// Capture context, if capturing.
    pub fn context(&self) -> Option<&Arc<CaptureContext>> {
        self.context.as_ref()
    }

    /// Finalizes as if the reader had been closed.
    pub fn close(&mut self) -> Option<Finalized> {
        live(&self.context)?.finalize(FinalizeReason::Closed)
    }
}

impl<R: BufRead> CaptureBufReader<R> {
    /// Reads one line, including its terminator, appending it to `buf`.
    ///
    /// Returns `Ok(0)` at end-of-stream, which finalizes the capture.
    pub fn read_line(&mut self, buf: &mut String) -> io::Result<usize> {
        let Some(context) = live(&self.context) else {
            return self.inner.read_line(buf);
        };
        let frame = OperationFrame::for_context(context.clone(), OperationCategory::CharRead);
        let start = buf.len();
        let n = self.inner.read_line(buf)?;
        if n == 0 {
            frame.end_of_stream();
        } else {
            frame.transferred(Transfer::Text(&buf[start..]));
        }
        Ok(n)
    }

    /// Iterator over lines without their terminators.
    pub fn lines(self) -> Lines<R> {
        Lines { reader: self }
    }

    /// Reads the unread remainder into the capture and finalizes it.
    pub fn drain_remaining(&mut self) -> Option<Finalized> {
        let context = live(&self.context)?.clone();
        controller::drain_into(&context, &mut self.inner);
        context.finalize(FinalizeReason::ForcedDrain)
    }
}

impl<R> Drop for CaptureBufReader<R> {
    fn drop(&mut self) {
        if let Some(context) = live(&self.context) {
            context.finalize(FinalizeReason::Dropped);
        }
    }
}

/// Lines of a [`CaptureBufReader`].
pub struct Lines<R> {
    reader: CaptureBufReader<R>,
}

impl<R: BufRead> Iterator for Lines<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => {
                if line.ends_with('\n') {
                    line.pop();
                    if line.ends_with('\r') {
                        line.pop();
                    }
                }
                Some(Ok(line))
            }
            Err(err) => Some(Err(err)),
        }
    }
}
