//! Header, metadata and parsed-form capture.
//!
//! These values are already materialized by the framework when a request is
//! handled, so they are written straight to the span without buffering.

use http::HeaderMap;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::config::{DataCaptureConfig, Direction};
use crate::span::{self, keys, AttributeKey, SpanSink};

/// Writes every header in `headers` to `span`.
///
/// Repeated headers are joined with `,`. Values that are not valid UTF-8 are
/// skipped. Returns the number of attributes written.
pub fn capture_headers(
    span: &dyn SpanSink,
    direction: Direction,
    headers: &HeaderMap,
    config: &DataCaptureConfig,
) -> usize {
    if !config.http_headers.enabled(direction) {
        return 0;
    }
    let mut written = 0;
    for name in headers.keys() {
        let mut values = Vec::new();
        for value in headers.get_all(name) {
            match value.to_str() {
                Ok(v) => values.push(v),
                Err(_) => debug!(header = %name, "Skipping non UTF-8 header value"),
            }
        }
        if values.is_empty() {
            continue;
        }
        let key = match direction {
            Direction::Request => keys::http_request_header(name.as_str()),
            Direction::Response => keys::http_response_header(name.as_str()),
        };
        span::emit(span, &key, values.join(","));
        written += 1;
    }
    written
}

/// Writes RPC metadata pairs to `span`; repeated keys are joined with `,`.
pub fn capture_rpc_metadata<'a, I>(
    span: &dyn SpanSink,
    direction: Direction,
    pairs: I,
    config: &DataCaptureConfig,
) -> usize
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    if !config.rpc_metadata.enabled(direction) {
        return 0;
    }
    let mut grouped: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for (name, value) in pairs {
        grouped.entry(name.to_ascii_lowercase()).or_default().push(value);
    }
    for (name, values) in &grouped {
        let key = match direction {
            Direction::Request => keys::rpc_request_metadata(name),
            Direction::Response => keys::rpc_response_metadata(name),
        };
        span::emit(span, &key, values.join(","));
    }
    grouped.len()
}

/// Renders form parameters as a JSON object string.
///
/// Single-valued parameters become strings, repeated ones arrays.
pub fn form_to_json<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut object = Map::new();
    for (name, value) in pairs {
        let value = Value::String(value.to_string());
        match object.get_mut(name) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                object.insert(name.to_string(), value);
            }
        }
    }
    Value::Object(object).to_string()
}

/// Captures a form body that the framework parsed into parameters.
///
/// Frameworks may expose the parameter map several times per request; only
/// the first call writes.
#[derive(Debug, Default)]
pub struct FormBodyCapture {
    captured: AtomicBool,
}

impl FormBodyCapture {
    /// Fresh, not yet captured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `pairs` as JSON under `key`. Returns `false` if already captured.
    pub fn capture<'a, I>(&self, span: &dyn SpanSink, key: &AttributeKey, pairs: I) -> bool
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        if self.captured.swap(true, Ordering::AcqRel) {
            return false;
        }
        span::emit(span, key, form_to_json(pairs));
        true
    }

    /// Whether the form was captured.
    pub fn is_captured(&self) -> bool {
        self.captured.load(Ordering::Acquire)
    }
}

/// One-shot form capture for callers without a per-request guard.
pub fn capture_form_body<'a, I>(
    span: &dyn SpanSink,
    key: &AttributeKey,
    pairs: I,
    guard: &FormBodyCapture,
) -> bool
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    guard.capture(span, key, pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::RecordingSpan;
    use http::HeaderValue;

    #[test]
    fn test_capture_request_headers() {
        let span = RecordingSpan::new();
        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        headers.append("Accept", HeaderValue::from_static("text/plain"));
        headers.append("Accept", HeaderValue::from_static("application/json"));

        let written = capture_headers(&span, Direction::Request, &headers, &DataCaptureConfig::default());
        assert_eq!(written, 2);
        assert_eq!(
            span.get("http.request.header.content-type").as_deref(),
            Some("application/json")
        );
        assert_eq!(
            span.get("http.request.header.accept").as_deref(),
            Some("text/plain,application/json")
        );
    }

    #[test]
    fn test_non_utf8_header_skipped() {
        let span = RecordingSpan::new();
        let mut headers = HeaderMap::new();
        headers.insert("x-bin", HeaderValue::from_bytes(&[0xFF, 0xFE]).unwrap());
        headers.insert("x-ok", HeaderValue::from_static("ok"));
        assert_eq!(
            capture_headers(&span, Direction::Response, &headers, &DataCaptureConfig::default()),
            1
        );
        assert!(span.get("http.response.header.x-bin").is_none());
        assert_eq!(span.get("http.response.header.x-ok").as_deref(), Some("ok"));
    }

    #[test]
    fn test_header_capture_disabled() {
        let span = RecordingSpan::new();
        let mut config = DataCaptureConfig::default();
        config.http_headers.request = false;
        let mut headers = HeaderMap::new();
        headers.insert("x-a", HeaderValue::from_static("1"));
        assert_eq!(capture_headers(&span, Direction::Request, &headers, &config), 0);
        assert!(span.attributes().is_empty());
    }

    #[test]
    fn test_rpc_metadata() {
        let span = RecordingSpan::new();
        let written = capture_rpc_metadata(
            &span,
            Direction::Request,
            [("Authority", "svc"), ("x-id", "1"), ("x-id", "2")],
            &DataCaptureConfig::default(),
        );
        assert_eq!(written, 2);
        assert_eq!(span.get("rpc.request.metadata.authority").as_deref(), Some("svc"));
        assert_eq!(span.get("rpc.request.metadata.x-id").as_deref(), Some("1,2"));
    }

    #[test]
    fn test_form_to_json() {
        let json = form_to_json([("a", "1"), ("b", "x y"), ("a", "2")]);
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["a"], serde_json::json!(["1", "2"]));
        assert_eq!(value["b"], "x y");
    }

    #[test]
    fn test_form_captured_once() {
        let span = RecordingSpan::new();
        let guard = FormBodyCapture::new();
        assert!(capture_form_body(&span, &keys::HTTP_REQUEST_BODY, [("k", "v")], &guard));
        assert!(!capture_form_body(&span, &keys::HTTP_REQUEST_BODY, [("k", "w")], &guard));
        assert!(guard.is_captured());
        assert_eq!(span.count("http.request.body"), 1);
        assert_eq!(span.get("http.request.body").as_deref(), Some("{\"k\":\"v\"}"));
    }
}
