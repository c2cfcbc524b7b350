//! Content-Length parsing for buffer sizing.

/// Parses a `Content-Length` value into an initial buffer capacity.
///
/// Returns `default` when the header is absent, not a number, zero, negative,
/// or does not fit in `usize`.
pub fn resolve_length(header: Option<&str>, default: usize) -> usize {
    let Some(raw) = header else {
        return default;
    };
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => default,
        Ok(len) => usize::try_from(len).unwrap_or(default),
    }
}

/// Initial capacity for a capture buffer: the declared length capped at `max`.
pub fn initial_capacity(header: Option<&str>, max: usize) -> usize {
    resolve_length(header, max).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT: usize = 128 * 1024;

    #[test]
    fn test_resolve_length() {
        assert_eq!(resolve_length(Some("42"), DEFAULT), 42);
        assert_eq!(resolve_length(Some(" 42 "), DEFAULT), 42);
        assert_eq!(resolve_length(None, DEFAULT), DEFAULT);
        assert_eq!(resolve_length(Some(""), DEFAULT), DEFAULT);
        assert_eq!(resolve_length(Some("0"), DEFAULT), DEFAULT);
        assert_eq!(resolve_length(Some("-5"), DEFAULT), DEFAULT);
        assert_eq!(resolve_length(Some("abc"), DEFAULT), DEFAULT);
        assert_eq!(
            resolve_length(Some("99999999999999999999999"), DEFAULT),
            DEFAULT
        );
    }

    #[test]
    fn test_initial_capacity_is_capped() {
        assert_eq!(initial_capacity(Some("10"), 4), 4);
        assert_eq!(initial_capacity(Some("3"), 4), 3);
        assert_eq!(initial_capacity(None, 4), 4);
    }
}
