//! Span collaborator: where finalized bodies and headers are written.
//!
//! The engine only needs `set_attribute(key, value)`. Spans that already
//! ended (common for client spans whose response body is read after the call
//! returns) cannot take attributes, so each adapter also knows how to attach
//! the value to a short-lived `additional-data` child instead.

use opentelemetry::trace::{Span as _, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};
use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Name of the child span that carries data for an already-ended parent.
pub const ADDITIONAL_DATA_SPAN_NAME: &str = "additional-data";

/// Span attribute key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeKey(Cow<'static, str>);

impl AttributeKey {
    /// Key from a static name.
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Key from an owned name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// Key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for AttributeKey {
    fn from(name: &'static str) -> Self {
        Self::from_static(name)
    }
}

/// Semantic attribute keys.
pub mod keys {
    use super::AttributeKey;

    /// Captured HTTP request body.
    pub const HTTP_REQUEST_BODY: AttributeKey = AttributeKey::from_static("http.request.body");
    /// Captured HTTP response body.
    pub const HTTP_RESPONSE_BODY: AttributeKey = AttributeKey::from_static("http.response.body");
    /// Captured RPC request body.
    pub const RPC_REQUEST_BODY: AttributeKey = AttributeKey::from_static("rpc.request.body");
    /// Captured RPC response body.
    pub const RPC_RESPONSE_BODY: AttributeKey = AttributeKey::from_static("rpc.response.body");

    /// `http.request.header.<name>` (lowercased).
    pub fn http_request_header(name: &str) -> AttributeKey {
        AttributeKey::new(format!("http.request.header.{}", name.to_ascii_lowercase()))
    }

    /// `http.response.header.<name>` (lowercased).
    pub fn http_response_header(name: &str) -> AttributeKey {
        AttributeKey::new(format!("http.response.header.{}", name.to_ascii_lowercase()))
    }

    /// `rpc.request.metadata.<name>` (lowercased).
    pub fn rpc_request_metadata(name: &str) -> AttributeKey {
        AttributeKey::new(format!("rpc.request.metadata.{}", name.to_ascii_lowercase()))
    }

    /// `rpc.response.metadata.<name>` (lowercased).
    pub fn rpc_response_metadata(name: &str) -> AttributeKey {
        AttributeKey::new(format!("rpc.response.metadata.{}", name.to_ascii_lowercase()))
    }
}

/// Destination for captured data.
pub trait SpanSink: Send + Sync {
    /// Sets a string attribute on the span.
    fn set_attribute(&self, key: &AttributeKey, value: String);

    /// Whether the span still accepts attributes.
    fn is_recording(&self) -> bool {
        true
    }

    /// Attaches data for a span that has already ended.
    fn add_detached(&self, key: &AttributeKey, value: String) {
        debug!(attribute = %key, "Span ended before capture completed; dropping value");
        drop(value);
    }
}

/// Sets `key` on `span`, or on a detached carrier if the span has ended.
pub fn emit(span: &dyn SpanSink, key: &AttributeKey, value: String) {
    if span.is_recording() {
        span.set_attribute(key, value);
    } else {
        span.add_detached(key, value);
    }
}

/// Shared handle to a span sink.
pub type SharedSpan = Arc<dyn SpanSink>;

// ============================================================================
// In-memory sink
// ============================================================================

/// In-memory span that records every attribute write in order.
#[derive(Debug, Default)]
pub struct RecordingSpan {
    inner: Mutex<RecordingInner>,
}

#[derive(Debug, Default)]
struct RecordingInner {
    attributes: Vec<(String, String)>,
    detached: Vec<(String, String)>,
    ended: bool,
}

impl RecordingSpan {
    /// New recording span.
    pub fn new() -> Self {
        Self::default()
    }

    /// New recording span behind an `Arc`.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RecordingInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks the span ended; later writes go to the detached list.
    pub fn end(&self) {
        self.lock().ended = true;
    }

    /// All attribute writes, in order.
    pub fn attributes(&self) -> Vec<(String, String)> {
        self.lock().attributes.clone()
    }

    /// Writes that arrived after [`end`](Self::end).
    pub fn detached(&self) -> Vec<(String, String)> {
        self.lock().detached.clone()
    }

    /// Last value written for `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.lock()
            .attributes
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Number of writes for `key`.
    pub fn count(&self, key: &str) -> usize {
        self.lock().attributes.iter().filter(|(k, _)| k == key).count()
    }
}

impl SpanSink for RecordingSpan {
    fn set_attribute(&self, key: &AttributeKey, value: String) {
        self.lock().attributes.push((key.as_str().to_string(), value));
    }

    fn is_recording(&self) -> bool {
        !self.lock().ended
    }

    fn add_detached(&self, key: &AttributeKey, value: String) {
        self.lock().detached.push((key.as_str().to_string(), value));
    }
}

// ============================================================================
// OpenTelemetry adapter
// ============================================================================

/// Adapter for any OpenTelemetry span.
///
/// Late values go to an `additional-data` child span started from the
/// original span context with the configured tracer.
pub struct OtelSpan<S> {
    span: Mutex<S>,
    tracer: Option<opentelemetry::global::BoxedTracer>,
}

impl<S> OtelSpan<S>
where
    S: opentelemetry::trace::Span + Send,
{
    /// Wraps `span`; late values use the global tracer named `bodycap`.
    pub fn new(span: S) -> Self {
        Self {
            span: Mutex::new(span),
            tracer: Some(opentelemetry::global::tracer("bodycap")),
        }
    }

    /// Wraps `span` without a tracer; late values are dropped.
    pub fn without_tracer(span: S) -> Self {
        Self {
            span: Mutex::new(span),
            tracer: None,
        }
    }

    /// Runs `f` with the wrapped span, e.g. to end it.
    pub fn with_span<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut span = self.span.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut span)
    }
}

impl<S> SpanSink for OtelSpan<S>
where
    S: opentelemetry::trace::Span + Send,
{
    fn set_attribute(&self, key: &AttributeKey, value: String) {
        self.with_span(|span| span.set_attribute(KeyValue::new(key.as_str().to_string(), value)));
    }

    fn is_recording(&self) -> bool {
        self.with_span(|span| span.is_recording())
    }

    fn add_detached(&self, key: &AttributeKey, value: String) {
        let Some(tracer) = &self.tracer else {
            debug!(attribute = %key, "No tracer for additional-data span; dropping value");
            return;
        };
        let span_context = self.with_span(|span| span.span_context().clone());
        let parent = Context::new().with_remote_span_context(span_context);
        let mut child = tracer
            .span_builder(ADDITIONAL_DATA_SPAN_NAME)
            .with_attributes(vec![KeyValue::new(key.as_str().to_string(), value)])
            .start_with_context(tracer, &parent);
        child.end();
    }
}

// ============================================================================
// tracing adapter
// ============================================================================

/// Adapter for a `tracing::Span`.
///
/// `tracing` only records fields declared when the span was created, so body
/// fields must be declared up front with `tracing::field::Empty`. Undeclared
/// keys and disabled spans fall back to an event parented to the span.
#[derive(Debug, Clone)]
pub struct TracingSpan(pub tracing::Span);

impl SpanSink for TracingSpan {
    fn set_attribute(&self, key: &AttributeKey, value: String) {
        if self.0.has_field(key.as_str()) {
            self.0.record(key.as_str(), value.as_str());
        } else {
            self.add_detached(key, value);
        }
    }

    fn is_recording(&self) -> bool {
        !self.0.is_disabled()
    }

    fn add_detached(&self, key: &AttributeKey, value: String) {
        tracing::info!(
            target: "bodycap::additional_data",
            parent: &self.0,
            attribute = %key,
            value = %value,
            "additional-data"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_keys_are_lowercased() {
        assert_eq!(
            keys::http_request_header("Content-Type").as_str(),
            "http.request.header.content-type"
        );
        assert_eq!(
            keys::rpc_response_metadata("X-Trace").as_str(),
            "rpc.response.metadata.x-trace"
        );
        assert_eq!(keys::HTTP_REQUEST_BODY.as_str(), "http.request.body");
    }

    #[test]
    fn test_emit_routes_by_recording_state() {
        let span = RecordingSpan::new();
        emit(&span, &keys::HTTP_REQUEST_BODY, "live".to_string());
        span.end();
        emit(&span, &keys::HTTP_RESPONSE_BODY, "late".to_string());

        assert_eq!(span.get("http.request.body").as_deref(), Some("live"));
        assert_eq!(span.get("http.response.body"), None);
        assert_eq!(
            span.detached(),
            vec![("http.response.body".to_string(), "late".to_string())]
        );
    }

    #[test]
    fn test_recording_span_counts() {
        let span = RecordingSpan::new();
        span.set_attribute(&keys::HTTP_REQUEST_BODY, "a".to_string());
        span.set_attribute(&keys::HTTP_REQUEST_BODY, "b".to_string());
        assert_eq!(span.count("http.request.body"), 2);
        assert_eq!(span.get("http.request.body").as_deref(), Some("b"));
    }

    #[test]
    fn test_tracing_span_without_subscriber_is_not_recording() {
        let span = TracingSpan(tracing::Span::none());
        assert!(!span.is_recording());
        emit(&span, &keys::HTTP_REQUEST_BODY, "dropped".to_string());
    }
}
