//! Character set resolution and decoding.

use encoding_rs::{CoderResult, Decoder, Encoding};
use std::borrow::Cow;
use std::fmt;
use tracing::warn;

use crate::error::{CaptureError, Result};

/// Character set used to render captured bytes.
///
/// ISO-8859-1 and US-ASCII are kept distinct from the WHATWG `windows-1252`
/// mapping that `encoding_rs` applies to their labels: Latin-1 bytes
/// `0x80..=0x9F` decode to their C1 code points as HTTP/1.1 defines, and a
/// US-ASCII body holding a byte above `0x7F` fails to decode.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    /// ISO-8859-1, the HTTP/1.1 default for byte bodies.
    Latin1,
    /// 7-bit US-ASCII.
    Ascii,
    /// Any encoding known to `encoding_rs`.
    Encoding(&'static Encoding),
}

const LATIN1_LABELS: &[&str] = &[
    "iso-8859-1",
    "iso8859-1",
    "iso_8859-1",
    "iso_8859-1:1987",
    "latin1",
    "l1",
    "cp819",
    "ibm819",
];

const ASCII_LABELS: &[&str] = &[
    "us-ascii",
    "ascii",
    "us",
    "iso646-us",
    "iso_646.irv:1991",
    "ansi_x3.4-1968",
    "ansi_x3.4-1986",
    "iso-ir-6",
    "cp367",
    "ibm367",
    "csascii",
];

impl Charset {
    /// UTF-8.
    pub fn utf8() -> Charset {
        Charset::Encoding(encoding_rs::UTF_8)
    }

    /// Default for byte-oriented bodies.
    pub fn byte_default() -> Charset {
        Charset::Latin1
    }

    /// Default for char-oriented bodies.
    pub fn char_default() -> Charset {
        Charset::utf8()
    }

    /// Looks up a charset by label, case-insensitively.
    pub fn for_label(label: &str) -> Option<Charset> {
        let label = label.trim().trim_matches('"');
        if label.is_empty() {
            return None;
        }
        if LATIN1_LABELS
            .iter()
            .any(|known| known.eq_ignore_ascii_case(label))
        {
            return Some(Charset::Latin1);
        }
        if ASCII_LABELS
            .iter()
            .any(|known| known.eq_ignore_ascii_case(label))
        {
            return Some(Charset::Ascii);
        }
        Encoding::for_label(label.as_bytes()).map(Charset::Encoding)
    }

    /// Resolves a label, falling back to `default` for absent or unknown names.
    pub fn resolve(label: Option<&str>, default: Charset) -> Charset {
        match label {
            None => default,
            Some(name) if name.trim().is_empty() => default,
            Some(name) => Charset::for_label(name).unwrap_or_else(|| {
                warn!(
                    charset = name,
                    default = default.name(),
                    "Could not parse charset, using default"
                );
                default
            }),
        }
    }

    /// Canonical name.
    pub fn name(&self) -> &'static str {
        match self {
            Charset::Latin1 => "ISO-8859-1",
            Charset::Ascii => "US-ASCII",
            Charset::Encoding(encoding) => encoding.name(),
        }
    }

    /// Strictly decodes `bytes`.
    ///
    /// Malformed input is an error. When `truncated` is set the tail may hold
    /// a sequence cut by the size cap, so decoding falls back to replacement
    /// instead of rejecting the whole body.
    pub fn decode<'a>(&self, bytes: &'a [u8], truncated: bool) -> Result<Cow<'a, str>> {
        match self {
            Charset::Latin1 => Ok(encoding_rs::mem::decode_latin1(bytes)),
            // Cutting ASCII never splits a character, so truncation changes nothing.
            Charset::Ascii => match bytes.iter().position(|b| !b.is_ascii()) {
                None => Ok(encoding_rs::mem::decode_latin1(bytes)),
                Some(at) => Err(CaptureError::Decode {
                    charset: "US-ASCII",
                    reason: format!("non-ASCII byte 0x{:02X} at offset {at}", bytes[at]),
                }),
            },
            Charset::Encoding(encoding) => {
                if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(bytes)
                {
                    return Ok(text);
                }
                if truncated {
                    let (text, _) = encoding.decode_without_bom_handling(bytes);
                    return Ok(text);
                }
                Err(CaptureError::Decode {
                    charset: encoding.name(),
                    reason: format!("malformed input in {} captured bytes", bytes.len()),
                })
            }
        }
    }

    /// Incremental decoder for input that arrives in chunks.
    pub fn stream_decoder(&self) -> StreamDecoder {
        match self {
            Charset::Latin1 => StreamDecoder::Latin1,
            Charset::Ascii => StreamDecoder::Ascii,
            Charset::Encoding(encoding) => {
                StreamDecoder::Encoding(encoding.new_decoder_without_bom_handling())
            }
        }
    }
}

/// Chunk-at-a-time decoder.
///
/// Multi-byte sequences split across chunks are carried over to the next
/// call. Malformed input is replaced with U+FFFD rather than rejected.
pub enum StreamDecoder {
    /// ISO-8859-1
    Latin1,
    /// US-ASCII
    Ascii,
    /// Stateful `encoding_rs` decoder
    Encoding(Decoder),
}

impl StreamDecoder {
    /// Decodes `bytes`; `last` flushes any incomplete trailing sequence.
    pub fn decode(&mut self, bytes: &[u8], last: bool) -> String {
        match self {
            StreamDecoder::Latin1 => encoding_rs::mem::decode_latin1(bytes).into_owned(),
            StreamDecoder::Ascii => bytes
                .iter()
                .map(|&b| if b.is_ascii() { char::from(b) } else { '\u{FFFD}' })
                .collect(),
            StreamDecoder::Encoding(decoder) => {
                let mut text = String::with_capacity(
                    decoder
                        .max_utf8_buffer_length(bytes.len())
                        .unwrap_or(bytes.len()),
                );
                let mut input = bytes;
                loop {
                    let (result, read, _) = decoder.decode_to_string(input, &mut text, last);
                    input = &input[read..];
                    match result {
                        CoderResult::InputEmpty => break,
                        CoderResult::OutputFull => text.reserve(
                            decoder
                                .max_utf8_buffer_length(input.len())
                                .unwrap_or(input.len())
                                .max(4),
                        ),
                    }
                }
                text
            }
        }
    }
}

impl fmt::Debug for StreamDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamDecoder::Latin1 => f.write_str("StreamDecoder(ISO-8859-1)"),
            StreamDecoder::Ascii => f.write_str("StreamDecoder(US-ASCII)"),
            StreamDecoder::Encoding(decoder) => {
                write!(f, "StreamDecoder({})", decoder.encoding().name())
            }
        }
    }
}

impl Default for Charset {
    fn default() -> Self {
        Charset::byte_default()
    }
}

impl fmt::Debug for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Charset({})", self.name())
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_label_variants() {
        assert_eq!(Charset::for_label("utf-8"), Some(Charset::utf8()));
        assert_eq!(Charset::for_label("UTF8"), Some(Charset::utf8()));
        assert_eq!(Charset::for_label("\"utf-8\""), Some(Charset::utf8()));
        assert_eq!(Charset::for_label("ISO-8859-1"), Some(Charset::Latin1));
        assert_eq!(Charset::for_label("latin1"), Some(Charset::Latin1));
        assert_eq!(
            Charset::for_label("windows-1252").map(|c| c.name()),
            Some("windows-1252")
        );
        assert_eq!(Charset::for_label("no-such-charset"), None);
        assert_eq!(Charset::for_label(""), None);
    }

    #[test]
    fn test_resolve_falls_back() {
        assert_eq!(Charset::resolve(None, Charset::Latin1), Charset::Latin1);
        assert_eq!(Charset::resolve(Some("  "), Charset::utf8()), Charset::utf8());
        assert_eq!(Charset::resolve(Some("bogus"), Charset::Latin1), Charset::Latin1);
        assert_eq!(Charset::resolve(Some("utf-8"), Charset::Latin1), Charset::utf8());
    }

    #[test]
    fn test_latin1_keeps_c1_controls() {
        let text = Charset::Latin1.decode(&[0x41, 0x80, 0xE9], false).unwrap();
        assert_eq!(text, "A\u{80}é");
    }

    #[test]
    fn test_utf8_strict_decode_rejects_malformed() {
        let err = Charset::utf8().decode(&[0x66, 0xFF, 0x6F], false).unwrap_err();
        assert!(matches!(err, CaptureError::Decode { charset: "UTF-8", .. }));
    }

    #[test]
    fn test_utf8_truncated_tail_is_tolerated() {
        // "é" is 0xC3 0xA9; the cap cut it in half.
        let text = Charset::utf8().decode(&[0x61, 0xC3], true).unwrap();
        assert!(text.starts_with('a'));
    }

    #[test]
    fn test_us_ascii_is_strict() {
        let ascii = Charset::for_label("US-ASCII").unwrap();
        assert_eq!(ascii, Charset::Ascii);
        assert_eq!(Charset::for_label("ascii"), Some(Charset::Ascii));
        assert_eq!(ascii.decode(b"plain", false).unwrap(), "plain");
        let err = ascii.decode(&[0x41, 0x80], false).unwrap_err();
        assert!(matches!(err, CaptureError::Decode { charset: "US-ASCII", .. }));
        assert!(ascii.decode(&[0x41, 0x80], true).is_err());
    }

    #[test]
    fn test_stream_decoder_joins_split_sequences() {
        // "é€" split inside both sequences.
        let mut decoder = Charset::utf8().stream_decoder();
        let mut text = decoder.decode(&[0x61, 0xC3], false);
        text.push_str(&decoder.decode(&[0xA9, 0xE2, 0x82], false));
        text.push_str(&decoder.decode(&[0xAC], false));
        text.push_str(&decoder.decode(&[], true));
        assert_eq!(text, "aé€");
    }

    #[test]
    fn test_stream_decoder_flushes_incomplete_tail() {
        let mut decoder = Charset::utf8().stream_decoder();
        assert_eq!(decoder.decode(&[0x61, 0xC3], false), "a");
        assert_eq!(decoder.decode(&[], true), "\u{FFFD}");
    }

    #[test]
    fn test_stream_decoder_single_byte_charsets() {
        assert_eq!(Charset::Latin1.stream_decoder().decode(&[0xE9], false), "é");
        assert_eq!(Charset::Ascii.stream_decoder().decode(&[0x41, 0xE9], false), "A\u{FFFD}");
    }

    #[test]
    fn test_decode_utf16le() {
        let utf16 = Charset::for_label("utf-16le").unwrap();
        let bytes: Vec<u8> = "hé".encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
        assert_eq!(utf16.decode(&bytes, false).unwrap(), "hé");
    }
}
