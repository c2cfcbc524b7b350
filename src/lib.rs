//! bodycap - bounded request/response body capture for tracing spans.
//!
//! Observes data flowing through streams owned by someone else, keeps a
//! bounded copy of it, and writes the copy to a span attribute exactly once
//! when the stream is exhausted, closed, drained or its async exchange
//! completes. Instrumentation never changes what the application reads or
//! writes and never surfaces an error to it.
//!
//! # Layout
//!
//! - [`policy`]: which content types are captured and with what charset.
//! - [`buffer`]: size-capped byte and char buffers.
//! - [`context`]: one capture context per stream, finalized once.
//! - [`registry`]: weak, identity-keyed association of streams to contexts.
//! - [`reentrancy`]: per-thread call depth so nested calls do not double count.
//! - [`controller`]: attach / accumulate / finalize lifecycle and async completion.
//! - [`stream`]: reader, writer and HTTP body adapters.
//! - [`headers`]: header, RPC metadata and parsed form capture.
//! - [`span`]: span sinks (OpenTelemetry, `tracing`, in-memory).
//!
//! # Example
//!
//! ```
//! use std::io::Read;
//! use bodycap::controller::{AttachRequest, CaptureController};
//! use bodycap::span::RecordingSpan;
//! use bodycap::stream::CaptureReader;
//!
//! let controller = CaptureController::default();
//! let span = RecordingSpan::shared();
//! let request = AttachRequest::http_request(span.clone(), Some("application/json"));
//! let mut reader = CaptureReader::attach(&b"{\"id\":7}"[..], &controller, request);
//!
//! let mut body = String::new();
//! reader.read_to_string(&mut body).unwrap();
//! assert_eq!(span.get("http.request.body").as_deref(), Some("{\"id\":7}"));
//! ```

pub mod buffer;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod headers;
pub mod logging;
pub mod metrics;
pub mod policy;
pub mod reentrancy;
pub mod registry;
pub mod span;
pub mod stream;

pub use config::{DataCaptureConfig, Direction};
pub use context::{CaptureContext, FinalizeReason, Finalized, Transfer};
pub use controller::{AsyncCompletion, AttachRequest, CaptureController, Protocol};
pub use error::{CaptureError, Result};
pub use policy::{BodyKind, Charset, ContentPolicy};
pub use span::{AttributeKey, SharedSpan, SpanSink};
