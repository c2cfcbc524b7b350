//! Capture counters exported through the OpenTelemetry global meter.
//!
//! With the `metrics` feature disabled every recorder is a no-op.

use crate::context::FinalizeReason;
use crate::span::AttributeKey;

#[cfg(feature = "metrics")]
mod otel {
    use once_cell::sync::Lazy;
    use opentelemetry::metrics::Counter;
    use opentelemetry::{global, KeyValue};

    pub(super) struct CaptureCounters {
        pub started: Counter<u64>,
        pub finalized: Counter<u64>,
        pub truncated: Counter<u64>,
        pub decode_failures: Counter<u64>,
        pub skipped: Counter<u64>,
    }

    pub(super) static COUNTERS: Lazy<CaptureCounters> = Lazy::new(|| {
        let meter = global::meter("bodycap");
        CaptureCounters {
            started: meter
                .u64_counter("bodycap.captures.started")
                .with_description("Streams attached for body capture")
                .build(),
            finalized: meter
                .u64_counter("bodycap.captures.finalized")
                .with_description("Capture contexts finalized")
                .build(),
            truncated: meter
                .u64_counter("bodycap.captures.truncated")
                .with_description("Captured bodies cut at the size cap")
                .build(),
            decode_failures: meter
                .u64_counter("bodycap.captures.decode_failures")
                .with_description("Captured bodies dropped because they did not decode")
                .build(),
            skipped: meter
                .u64_counter("bodycap.captures.skipped")
                .with_description("Attach requests rejected by content policy or config")
                .build(),
        }
    });

    pub(super) fn attrs(key: &str) -> [KeyValue; 1] {
        [KeyValue::new("attribute", key.to_string())]
    }
}

/// A stream was attached for capture.
pub fn record_started(key: &AttributeKey) {
    #[cfg(feature = "metrics")]
    otel::COUNTERS.started.add(1, &otel::attrs(key.as_str()));
    #[cfg(not(feature = "metrics"))]
    let _ = key;
}

/// An attach request was declined.
pub fn record_skipped(key: &AttributeKey) {
    #[cfg(feature = "metrics")]
    otel::COUNTERS.skipped.add(1, &otel::attrs(key.as_str()));
    #[cfg(not(feature = "metrics"))]
    let _ = key;
}

/// A context was finalized.
pub fn record_finalized(key: &AttributeKey, reason: FinalizeReason, truncated: bool) {
    #[cfg(feature = "metrics")]
    {
        use opentelemetry::KeyValue;
        let [attribute] = otel::attrs(key.as_str());
        otel::COUNTERS
            .finalized
            .add(1, &[attribute.clone(), KeyValue::new("reason", reason.as_str())]);
        if truncated {
            otel::COUNTERS.truncated.add(1, &[attribute]);
        }
    }
    #[cfg(not(feature = "metrics"))]
    let _ = (key, reason, truncated);
}

/// A captured body could not be decoded.
pub fn record_decode_failure(key: &AttributeKey) {
    #[cfg(feature = "metrics")]
    otel::COUNTERS.decode_failures.add(1, &otel::attrs(key.as_str()));
    #[cfg(not(feature = "metrics"))]
    let _ = key;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::keys;

    #[test]
    fn test_recorders_do_not_panic_without_provider() {
        record_started(&keys::HTTP_REQUEST_BODY);
        record_skipped(&keys::HTTP_RESPONSE_BODY);
        record_finalized(&keys::HTTP_REQUEST_BODY, FinalizeReason::EndOfStream, true);
        record_decode_failure(&keys::RPC_REQUEST_BODY);
    }
}
