#![no_main]

//! Fuzz target for capture buffers.
//!
//! Any sequence of transfers keeps the buffer within its cap, and finalize
//! never panics whatever bytes were captured or charset was declared.

use arbitrary::Arbitrary;
use bodycap::context::{CaptureContext, FinalizeReason, Transfer};
use bodycap::policy::{BodyKind, Charset};
use bodycap::span::{keys, RecordingSpan};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input<'a> {
    chars: bool,
    max: u16,
    charset: &'a str,
    chunks: Vec<&'a [u8]>,
}

fuzz_target!(|input: Input<'_>| {
    let kind = if input.chars { BodyKind::Chars } else { BodyKind::Bytes };
    let charset = Charset::resolve(Some(input.charset), kind.default_charset());
    let max = usize::from(input.max);
    let context = CaptureContext::shared(
        RecordingSpan::shared(),
        keys::HTTP_REQUEST_BODY,
        charset,
        kind,
        max,
    );

    for chunk in &input.chunks {
        match kind {
            BodyKind::Bytes => context.record(Transfer::Bytes(chunk)),
            BodyKind::Chars => context.record(Transfer::Text(&String::from_utf8_lossy(chunk))),
        };
        assert!(context.captured_len() <= max);
    }
    let _ = context.finalize(FinalizeReason::EndOfStream);
});
