//! Capturing writers.

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use super::live;
use crate::context::{CaptureContext, FinalizeReason, Finalized, Transfer};
use crate::controller::{AttachRequest, CaptureController, OperationFrame};
use crate::reentrancy::OperationCategory;

/// Byte writer that copies everything accepted by the inner writer into a
/// capture context. Close or drop finalizes.
pub struct CaptureWriter<W> {
    inner: W,
    context: Option<Arc<CaptureContext>>,
}

impl<W> CaptureWriter<W> {
    /// Wraps `inner`; `None` passes writes through untouched.
    pub fn new(inner: W, context: Option<Arc<CaptureContext>>) -> Self {
        Self { inner, context }
    }

    /// Wraps `inner` with a context built by `controller`.
    pub fn attach(inner: W, controller: &CaptureController, request: AttachRequest<'_>) -> Self {
        Self::new(inner, controller.context_for(request))
    }

    /// Capture context, if capturing.
    pub fn context(&self) -> Option<&Arc<CaptureContext>> {
        self.context.as_ref()
    }

    /// Underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }
}

impl<W: Write> CaptureWriter<W> {
    /// Flushes the inner writer and finalizes the capture.
    ///
    /// The capture is finalized even if the flush fails.
    pub fn close(&mut self) -> io::Result<Option<Finalized>> {
        let flushed = self.inner.flush();
        let finalized = live(&self.context).and_then(|c| c.finalize(FinalizeReason::Closed));
        flushed.map(|()| finalized)
    }
}

impl<W: Write> Write for CaptureWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let Some(context) = live(&self.context) else {
            return self.inner.write(buf);
        };
        let frame = OperationFrame::for_context(context.clone(), OperationCategory::ByteWrite);
        let n = self.inner.write(buf)?;
        frame.transferred(Transfer::Bytes(&buf[..n]));
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W> Drop for CaptureWriter<W> {
    fn drop(&mut self) {
        if let Some(context) = live(&self.context) {
            context.finalize(FinalizeReason::Dropped);
        }
    }
}

/// Text writer over any [`fmt::Write`], feeding a char capture buffer.
pub struct CaptureTextWriter<W> {
    inner: W,
    context: Option<Arc<CaptureContext>>,
}

impl<W> CaptureTextWriter<W> {
    /// Wraps `inner`; the context should be char-oriented.
    pub fn new(inner: W, context: Option<Arc<CaptureContext>>) -> Self {
        Self { inner, context }
    }

    /// Wraps `inner` with a char context built by `controller`.
    pub fn attach(inner: W, controller: &CaptureController, request: AttachRequest<'_>) -> Self {
        Self::new(inner, controller.context_for(request.chars()))
    }

    /// Capture context, if capturing.
    pub fn context(&self) -> Option<&Arc<CaptureContext>> {
        self.context.as_ref()
    }

    /// Underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Finalizes the capture.
    pub fn close(&mut self) -> Option<Finalized> {
        live(&self.context)?.finalize(FinalizeReason::Closed)
    }
}

impl<W: fmt::Write> fmt::Write for CaptureTextWriter<W> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let Some(context) = live(&self.context) else {
            return self.inner.write_str(s);
        };
        let frame = OperationFrame::for_context(context.clone(), OperationCategory::CharWrite);
        self.inner.write_str(s)?;
        frame.transferred(Transfer::Text(s));
        Ok(())
    }
}

impl<W> Drop for CaptureTextWriter<W> {
    fn drop(&mut self) {
        if let Some(context) = live(&self.context) {
            context.finalize(FinalizeReason::Dropped);
        }
    }
}
