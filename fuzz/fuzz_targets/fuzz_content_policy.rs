#![no_main]

//! Fuzz target for content-type parsing.
//!
//! Arbitrary header values must never panic, and a capture decision must be
//! consistent with the allow-list check.

use bodycap::policy::{self, BodyKind, ContentPolicy};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(content_type) = std::str::from_utf8(data) else {
        return;
    };
    let policy = ContentPolicy::default();

    let _ = policy::parse_charset(content_type);
    let _ = policy::resolve_length(Some(content_type), 128 * 1024);

    for kind in [BodyKind::Bytes, BodyKind::Chars] {
        let decision = policy.decide(Some(content_type), kind);
        assert_eq!(decision.should_capture, policy.should_capture(Some(content_type)));
    }
});
