//! Property-based tests for the capture invariants.
//!
//! Coverage:
//! - buffers never exceed their cap and flag truncation instead of failing
//! - finalize writes the span attribute exactly once
//! - nested frames of one category mutate the buffer once
//! - text in a declared charset renders back unchanged

use bodycap::buffer::bytes::BoundedByteBuffer;
use bodycap::buffer::chars::BoundedCharBuffer;
use bodycap::context::{CaptureContext, FinalizeReason, Transfer};
use bodycap::controller::OperationFrame;
use bodycap::policy::{BodyKind, Charset};
use bodycap::reentrancy::OperationCategory;
use bodycap::span::{keys, RecordingSpan};
use proptest::prelude::*;

/// Encodes `text` (at most U+00FF) in one of the round-trip charsets.
fn encode(label: &str, text: &str) -> Vec<u8> {
    match label {
        "iso-8859-1" => text.chars().map(|c| c as u8).collect(),
        "utf-16le" => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
        _ => text.as_bytes().to_vec(),
    }
}

proptest! {
    /// Byte buffer length never exceeds the cap.
    #[test]
    fn prop_byte_buffer_bounded(
        max in 0usize..256,
        chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..32),
    ) {
        let mut buffer = BoundedByteBuffer::new(max);
        let mut offered = 0usize;
        for chunk in &chunks {
            offered += chunk.len();
            let kept = buffer.append(chunk);
            prop_assert!(kept <= chunk.len());
            prop_assert!(buffer.len() <= max);
        }
        prop_assert_eq!(buffer.len(), offered.min(max));
        prop_assert_eq!(buffer.is_truncated(), offered > max);
    }

    /// Char buffer counts chars, not bytes, against the cap.
    #[test]
    fn prop_char_buffer_bounded(
        max in 0usize..128,
        chunks in prop::collection::vec(".{0,24}", 0..16),
    ) {
        let mut buffer = BoundedCharBuffer::new(max);
        let mut offered = 0usize;
        for chunk in &chunks {
            offered += chunk.chars().count();
            buffer.append(chunk);
            prop_assert!(buffer.len() <= max);
            prop_assert_eq!(buffer.as_str().chars().count(), buffer.len());
        }
        prop_assert_eq!(buffer.is_truncated(), offered > max);
    }

    /// However many finalize signals arrive, one attribute is written.
    #[test]
    fn prop_finalize_once(signals in prop::collection::vec(0u8..6, 1..10)) {
        let span = RecordingSpan::shared();
        let context = CaptureContext::shared(
            span.clone(),
            keys::HTTP_REQUEST_BODY,
            Charset::utf8(),
            BodyKind::Bytes,
            64,
        );
        context.record(Transfer::Bytes(b"body"));
        let mut emitted = 0;
        for signal in signals {
            let reason = match signal {
                0 => FinalizeReason::EndOfStream,
                1 => FinalizeReason::Closed,
                2 => FinalizeReason::AsyncComplete,
                3 => FinalizeReason::AsyncError,
                4 => FinalizeReason::ForcedDrain,
                _ => FinalizeReason::Dropped,
            };
            if context.finalize(reason).is_some() {
                emitted += 1;
            }
        }
        prop_assert_eq!(emitted, 1);
        prop_assert_eq!(span.count("http.request.body"), 1);
    }

    /// Only the outermost of `depth` nested frames records.
    #[test]
    fn prop_nested_frames_record_once(
        depth in 1usize..8,
        data in prop::collection::vec(any::<u8>(), 1..32),
    ) {
        let context = CaptureContext::shared(
            RecordingSpan::shared(),
            keys::HTTP_REQUEST_BODY,
            Charset::byte_default(),
            BodyKind::Bytes,
            1024,
        );
        let mut frames: Vec<_> = (0..depth)
            .map(|_| OperationFrame::for_context(context.clone(), OperationCategory::ByteRead))
            .collect();
        // Unwind innermost first, each frame reporting the same transfer.
        while let Some(frame) = frames.pop() {
            frame.transferred(Transfer::Bytes(&data));
        }
        prop_assert_eq!(context.captured_len(), data.len());
    }

    /// Text encoded in a declared charset renders back unchanged.
    #[test]
    fn prop_charset_round_trip(text in "[ -~à-ÿ]{0,64}", label in prop::sample::select(vec!["utf-8", "iso-8859-1", "utf-16le"])) {
        let charset = Charset::for_label(label).unwrap();
        let span = RecordingSpan::shared();
        let context = CaptureContext::shared(
            span.clone(),
            keys::HTTP_RESPONSE_BODY,
            charset,
            BodyKind::Bytes,
            4096,
        );
        context.record(Transfer::Bytes(&encode(label, &text)));
        let done = context.finalize(FinalizeReason::EndOfStream).unwrap();
        prop_assert_eq!(done.body.as_deref(), Some(text.as_str()));
    }
}
