//! Capture wrapper for HTTP bodies.

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use super::live;
use crate::context::{CaptureContext, FinalizeReason, Finalized, Transfer};
use crate::controller::{AttachRequest, CaptureController, OperationFrame};
use crate::reentrancy::OperationCategory;

/// Wrapper that copies the data frames of a body into a capture context.
///
/// Frames are forwarded unchanged. The capture is finalized when the inner
/// body reports end-of-stream, when it yields an error, or when the wrapper
/// is dropped before either (a client that stops reading early).
pub struct CaptureBody<B> {
    inner: B,
    context: Option<Arc<CaptureContext>>,
}

impl<B> CaptureBody<B> {
    /// Wraps `inner`; `None` forwards frames untouched.
    pub fn new(inner: B, context: Option<Arc<CaptureContext>>) -> Self {
        Self { inner, context }
    }

    /// Wraps `inner` with a context built by `controller`.
    pub fn attach(inner: B, controller: &CaptureController, request: AttachRequest<'_>) -> Self {
        Self::new(inner, controller.context_for(request))
    }

    /// Capture context, if capturing.
    pub fn context(&self) -> Option<&Arc<CaptureContext>> {
        self.context.as_ref()
    }

    /// Finalizes with what has been seen so far.
    pub fn finish(&self) -> Option<Finalized> {
        live(&self.context)?.finalize(FinalizeReason::Closed)
    }
}

impl<B> Body for CaptureBody<B>
where
    B: Body<Data = Bytes> + Unpin,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;

        let Some(context) = live(&this.context).cloned() else {
            return Pin::new(&mut this.inner).poll_frame(cx);
        };
        let op = OperationFrame::for_context(context.clone(), OperationCategory::BodyPoll);

        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            // A wrapper nested under another on the same context stays inert.
            Poll::Ready(Some(Ok(_))) if !op.is_outermost() => {}
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    context.record(Transfer::Bytes(data));
                }
                // Servers stop polling once the body says it is done.
                if this.inner.is_end_stream() {
                    op.end_of_stream();
                }
            }
            Poll::Ready(Some(Err(_))) => {
                op.complete(FinalizeReason::AsyncError);
            }
            Poll::Ready(None) => {
                op.end_of_stream();
            }
            Poll::Pending => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B> Drop for CaptureBody<B> {
    fn drop(&mut self) {
        if let Some(context) = live(&self.context) {
            context.finalize(FinalizeReason::Dropped);
        }
    }
}
