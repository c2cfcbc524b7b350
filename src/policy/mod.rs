//! Content policy: decides whether a body is captured and how it is decoded.
//!
//! The decision is taken once, when a stream or entity is first exposed, from
//! the `Content-Type` header already extracted by the framework layer. Nothing
//! here fails: malformed headers and unknown charsets degrade to "not
//! captured" or to the default charset.

pub mod charset;
pub mod length;

pub use charset::{Charset, StreamDecoder};
pub use length::{initial_capacity, resolve_length};

use crate::config::DataCaptureConfig;

/// Media types that are never captured even when an allow-list entry matches,
/// e.g. `multipart/form-data; boundary=...json...`.
const DENIED_CONTENT_TYPES: &[&str] = &["multipart/", "application/octet-stream"];

/// Unit of data flowing through a captured stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyKind {
    /// Raw byte streams (input/output streams, HTTP bodies).
    Bytes,
    /// Text streams (readers, writers).
    Chars,
}

impl BodyKind {
    /// Charset used when the content type declares none.
    pub fn default_charset(self) -> Charset {
        match self {
            BodyKind::Bytes => Charset::byte_default(),
            BodyKind::Chars => Charset::char_default(),
        }
    }
}

/// Outcome of evaluating a content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyDecision {
    /// Whether the body should be captured at all.
    pub should_capture: bool,
    /// Charset to render the captured body with.
    pub charset: Charset,
}

impl PolicyDecision {
    /// A decision that skips capture.
    pub fn skip(kind: BodyKind) -> Self {
        Self {
            should_capture: false,
            charset: kind.default_charset(),
        }
    }

    /// Returns `true` if the body is captured.
    pub fn is_capture(&self) -> bool {
        self.should_capture
    }
}

/// Allow-list driven content policy.
#[derive(Debug, Clone)]
pub struct ContentPolicy {
    allowed: Vec<String>,
}

impl ContentPolicy {
    /// Creates a policy from allow-list fragments, matched as case-insensitive
    /// substrings of the content type.
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: allowed
                .into_iter()
                .map(|s| s.as_ref().trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Creates a policy from the configured allow-list.
    pub fn from_config(config: &DataCaptureConfig) -> Self {
        Self::new(&config.allowed_content_types)
    }

    /// Returns `true` if a body with this content type should be captured.
    pub fn should_capture(&self, content_type: Option<&str>) -> bool {
        let Some(content_type) = content_type else {
            return false;
        };
        let media_type = media_type(content_type);
        if media_type.is_empty() {
            return false;
        }
        if DENIED_CONTENT_TYPES.iter().any(|d| media_type.contains(d)) {
            return false;
        }
        self.allowed.iter().any(|a| media_type.contains(a.as_str()))
    }

    /// Evaluates a content type for a stream carrying `kind` units.
    pub fn decide(&self, content_type: Option<&str>, kind: BodyKind) -> PolicyDecision {
        if !self.should_capture(content_type) {
            return PolicyDecision::skip(kind);
        }
        PolicyDecision {
            should_capture: true,
            charset: Charset::resolve(content_type.and_then(parse_charset), kind.default_charset()),
        }
    }
}

impl Default for ContentPolicy {
    fn default() -> Self {
        Self::from_config(&DataCaptureConfig::default())
    }
}

/// Lowercased media type (everything before the first `;`), with an optional
/// `Content-Type:` prefix removed.
fn media_type(content_type: &str) -> String {
    let mut value = content_type.trim();
    if let Some((name, rest)) = value.split_once(':') {
        if name.trim().eq_ignore_ascii_case("content-type") {
            value = rest.trim();
        }
    }
    value
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Extracts the `charset` parameter of a content type, if any.
pub fn parse_charset(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let value = value.trim().trim_matches('"').trim();
        (!value.is_empty()).then_some(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ContentPolicy {
        ContentPolicy::default()
    }

    #[test]
    fn test_should_capture_allowed_types() {
        for content_type in [
            "jSoN",
            "application/json",
            "application/graphQL",
            "application/x-www-forM-urlencoded",
            "text/xml",
            "application/soap+xml; charset=utf-8",
            "text/plain",
        ] {
            assert!(policy().should_capture(Some(content_type)), "{content_type}");
        }
    }

    #[test]
    fn test_should_not_capture() {
        for content_type in [
            "",
            "   ",
            "application/octet-stream",
            "multipart/form-data; boundary=json",
            "image/png",
            "application/grpc",
        ] {
            assert!(!policy().should_capture(Some(content_type)), "{content_type}");
        }
        assert!(!policy().should_capture(None));
    }

    #[test]
    fn test_custom_allow_list() {
        let only_json = ContentPolicy::new(["json"]);
        assert!(only_json.should_capture(Some("application/json")));
        assert!(!only_json.should_capture(Some("text/plain")));
    }

    #[test]
    fn test_parse_charset() {
        assert_eq!(
            parse_charset("Content-Type: application/json; charset=utf-8"),
            Some("utf-8")
        );
        assert_eq!(
            parse_charset("application/json; charset=windows-1252"),
            Some("windows-1252")
        );
        assert_eq!(
            parse_charset("application/json; CHARSET=\"UTF-8\"; q=1"),
            Some("UTF-8")
        );
        assert_eq!(parse_charset("Content-Type: application/json;"), None);
        assert_eq!(parse_charset("Content-Type: application/json; charset="), None);
        assert_eq!(parse_charset("application/json"), None);
    }

    #[test]
    fn test_decide_resolves_charset() {
        let decision = policy().decide(Some("application/json; charset=utf-8"), BodyKind::Bytes);
        assert!(decision.is_capture());
        assert_eq!(decision.charset, Charset::utf8());

        let decision = policy().decide(Some("application/json"), BodyKind::Bytes);
        assert_eq!(decision.charset, Charset::Latin1);

        let decision = policy().decide(Some("application/json"), BodyKind::Chars);
        assert_eq!(decision.charset, Charset::utf8());

        let decision = policy().decide(Some("application/json; charset=nope"), BodyKind::Bytes);
        assert!(decision.is_capture());
        assert_eq!(decision.charset, Charset::Latin1);
    }

    #[test]
    fn test_decide_skip() {
        let decision = policy().decide(Some("multipart/form-data"), BodyKind::Bytes);
        assert!(!decision.is_capture());
        assert_eq!(decision, PolicyDecision::skip(BodyKind::Bytes));
    }
}
