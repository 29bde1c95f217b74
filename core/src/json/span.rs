//! Borrowed JSON string views and escape handling

use core::fmt;

use heapless::{String, Vec};
use serde::de::{self, Deserialize, Deserializer, Visitor};

use super::JsonError;

/// A view of a JSON string's contents inside the caller's input buffer
///
/// The bytes are exactly as they appear between the quotes, escapes
/// included. Comparisons against plain text resolve escapes on the fly.
/// Deserializing a span with `serde_json_core::from_slice` borrows the
/// string from the input.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct JsonSpan<'a> {
    raw: &'a [u8],
}

impl<'a> JsonSpan<'a> {
    /// The empty span
    pub const EMPTY: JsonSpan<'static> = JsonSpan { raw: &[] };

    /// Wrap raw (still escaped) string contents
    pub const fn new(raw: &'a [u8]) -> Self {
        Self { raw }
    }

    /// Raw escaped bytes
    pub fn as_bytes(&self) -> &'a [u8] {
        self.raw
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Whether the raw bytes contain any escape sequence
    pub fn has_escapes(&self) -> bool {
        self.raw.contains(&b'\\')
    }

    /// Borrow as `&str` when the span is valid UTF-8 and contains no escapes
    pub fn as_str(&self) -> Option<&'a str> {
        if self.has_escapes() {
            return None;
        }
        core::str::from_utf8(self.raw).ok()
    }

    /// Iterate over the unescaped bytes
    pub fn unescaped(&self) -> Unescaped<'a> {
        Unescaped::new(self.raw)
    }

    /// Compare the unescaped contents with `text`
    pub fn matches(&self, text: &str) -> bool {
        self.matches_bytes(text.as_bytes())
    }

    /// Compare the unescaped contents with `text`
    pub fn matches_bytes(&self, text: &[u8]) -> bool {
        if !self.has_escapes() {
            return self.raw == text;
        }
        let mut decoded = self.unescaped();
        for &expected in text {
            match decoded.next() {
                Some(byte) if byte == expected => {}
                _ => return false,
            }
        }
        decoded.next().is_none() && !decoded.failed()
    }

    /// Copy the unescaped contents into `out`
    ///
    /// # Returns
    ///
    /// The filled prefix of `out`, or `JsonError::BufferFull` if it is too
    /// short.
    pub fn unescape_into<'b>(&self, out: &'b mut [u8]) -> Result<&'b [u8], JsonError> {
        let mut len = 0;
        let mut decoded = self.unescaped();
        for byte in decoded.by_ref() {
            let slot = out.get_mut(len).ok_or(JsonError::BufferFull)?;
            *slot = byte;
            len += 1;
        }
        if decoded.failed() {
            return Err(JsonError::InvalidEscape);
        }
        Ok(&out[..len])
    }

    /// Unescape into an owned bounded string
    pub fn unescape_to_string<const N: usize>(&self) -> Result<String<N>, JsonError> {
        let mut bytes = Vec::<u8, N>::new();
        let mut decoded = self.unescaped();
        for byte in decoded.by_ref() {
            bytes.push(byte).map_err(|_| JsonError::BufferFull)?;
        }
        if decoded.failed() {
            return Err(JsonError::InvalidEscape);
        }
        String::from_utf8(bytes).map_err(|_| JsonError::InvalidEscape)
    }
}

impl<'de: 'a, 'a> Deserialize<'de> for JsonSpan<'a> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(SpanVisitor)
    }
}

struct SpanVisitor;

impl<'de> Visitor<'de> for SpanVisitor {
    type Value = JsonSpan<'de>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string borrowed from the input")
    }

    fn visit_borrowed_str<E: de::Error>(self, value: &'de str) -> Result<Self::Value, E> {
        Ok(JsonSpan::new(value.as_bytes()))
    }
}

impl fmt::Debug for JsonSpan<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match core::str::from_utf8(self.raw) {
            Ok(text) => write!(f, "{:?}", text),
            Err(_) => write!(f, "{:?}", self.raw),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for JsonSpan<'_> {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{=[u8]:a}", self.raw)
    }
}

/// Iterator over the unescaped bytes of a raw JSON string
///
/// Stops early on a malformed escape; check `failed()` afterwards.
#[derive(Debug, Clone)]
pub struct Unescaped<'a> {
    raw: &'a [u8],
    pos: usize,
    pending: [u8; 4],
    pending_len: u8,
    pending_pos: u8,
    failed: bool,
}

impl<'a> Unescaped<'a> {
    fn new(raw: &'a [u8]) -> Self {
        Self {
            raw,
            pos: 0,
            pending: [0; 4],
            pending_len: 0,
            pending_pos: 0,
            failed: false,
        }
    }

    /// Whether iteration stopped on a malformed escape
    pub fn failed(&self) -> bool {
        self.failed
    }
}

impl Iterator for Unescaped<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        if self.pending_pos < self.pending_len {
            let byte = self.pending[self.pending_pos as usize];
            self.pending_pos += 1;
            return Some(byte);
        }
        if self.failed {
            return None;
        }
        let byte = *self.raw.get(self.pos)?;
        if byte != b'\\' {
            self.pos += 1;
            return Some(byte);
        }
        match decode_escape(self.raw, self.pos) {
            Ok(escape) => {
                self.pos += escape.consumed;
                self.pending = escape.bytes;
                self.pending_len = escape.len as u8;
                self.pending_pos = 1;
                Some(escape.bytes[0])
            }
            Err(_) => {
                self.failed = true;
                None
            }
        }
    }
}

/// One decoded escape sequence
struct Escape {
    bytes: [u8; 4],
    len: usize,
    consumed: usize,
}

/// Decode the escape sequence starting at `raw[pos]` (a backslash)
fn decode_escape(raw: &[u8], pos: usize) -> Result<Escape, JsonError> {
    let simple = |byte: u8| Escape {
        bytes: [byte, 0, 0, 0],
        len: 1,
        consumed: 2,
    };
    match raw.get(pos + 1).copied() {
        Some(b'"') => Ok(simple(b'"')),
        Some(b'\\') => Ok(simple(b'\\')),
        Some(b'/') => Ok(simple(b'/')),
        Some(b'b') => Ok(simple(0x08)),
        Some(b'f') => Ok(simple(0x0c)),
        Some(b'n') => Ok(simple(b'\n')),
        Some(b'r') => Ok(simple(b'\r')),
        Some(b't') => Ok(simple(b'\t')),
        Some(b'u') => {
            let high = hex4(raw, pos + 2)?;
            let (code_point, consumed) = match high {
                0xD800..=0xDBFF => {
                    // High surrogate must be followed by an escaped low surrogate
                    if raw.get(pos + 6) != Some(&b'\\') || raw.get(pos + 7) != Some(&b'u') {
                        return Err(JsonError::InvalidEscape);
                    }
                    let low = hex4(raw, pos + 8)?;
                    if !(0xDC00..=0xDFFF).contains(&low) {
                        return Err(JsonError::InvalidEscape);
                    }
                    (0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00), 12)
                }
                0xDC00..=0xDFFF => return Err(JsonError::InvalidEscape),
                _ => (high, 6),
            };
            let ch = char::from_u32(code_point).ok_or(JsonError::InvalidEscape)?;
            let mut bytes = [0u8; 4];
            let len = ch.encode_utf8(&mut bytes).len();
            Ok(Escape {
                bytes,
                len,
                consumed,
            })
        }
        _ => Err(JsonError::InvalidEscape),
    }
}

fn hex4(raw: &[u8], pos: usize) -> Result<u32, JsonError> {
    let digits = raw.get(pos..pos + 4).ok_or(JsonError::InvalidEscape)?;
    digits.iter().try_fold(0u32, |acc, &digit| {
        let value = match digit {
            b'0'..=b'9' => digit - b'0',
            b'a'..=b'f' => digit - b'a' + 10,
            b'A'..=b'F' => digit - b'A' + 10,
            _ => return Err(JsonError::InvalidEscape),
        };
        Ok((acc << 4) | value as u32)
    })
}

/// Resolve JSON escapes in place
///
/// Decoded output is never longer than its escaped form, so the rewrite
/// happens front to back within `buf`. Bytes past the returned length are
/// left as they were.
///
/// # Returns
///
/// The length of the unescaped contents at the start of `buf`.
pub fn unescape_in_place(buf: &mut [u8]) -> Result<usize, JsonError> {
    let mut read = 0;
    let mut write = 0;
    while read < buf.len() {
        if buf[read] == b'\\' {
            let escape = decode_escape(buf, read)?;
            buf[write..write + escape.len].copy_from_slice(&escape.bytes[..escape.len]);
            write += escape.len;
            read += escape.consumed;
        } else {
            buf[write] = buf[read];
            write += 1;
            read += 1;
        }
    }
    Ok(write)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unescape_in_place_simple_escapes() {
        let mut buf = *br#"{\"a\":\"b\\c\/d\n\"}"#;
        let len = unescape_in_place(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"{\"a\":\"b\\c/d\n\"}");
    }

    #[test]
    fn test_unescape_in_place_unicode() {
        let mut buf = *br#"caf\u00e9 \ud83d\ude00"#;
        let len = unescape_in_place(&mut buf).unwrap();
        assert_eq!(&buf[..len], "café 😀".as_bytes());
    }

    #[test]
    fn test_unescape_in_place_rejects_bad_escapes() {
        let mut bad = *br#"abc\x"#;
        assert_eq!(unescape_in_place(&mut bad), Err(JsonError::InvalidEscape));
        let mut lone_low = *br#"\udc00"#;
        assert_eq!(unescape_in_place(&mut lone_low), Err(JsonError::InvalidEscape));
        let mut truncated = *br#"\u00"#;
        assert_eq!(unescape_in_place(&mut truncated), Err(JsonError::InvalidEscape));
    }

    #[test]
    fn test_span_matches_with_escapes() {
        let span = JsonSpan::new(br#"http:\/\/example.com\/fw"#);
        assert!(span.matches("http://example.com/fw"));
        assert!(!span.matches("http://example.com/f"));
        assert!(!span.matches("http://example.com/fw2"));
        assert_eq!(span.as_str(), None);

        let plain = JsonSpan::new(b"sha256");
        assert!(plain.matches("sha256"));
        assert_eq!(plain.as_str(), Some("sha256"));
    }

    #[test]
    fn test_span_unescape_into() {
        let span = JsonSpan::new(br#"a\tb"#);
        let mut out = [0u8; 8];
        assert_eq!(span.unescape_into(&mut out).unwrap(), b"a\tb");

        let mut small = [0u8; 2];
        assert_eq!(span.unescape_into(&mut small), Err(JsonError::BufferFull));
    }

    #[test]
    fn test_span_to_string() {
        let span = JsonSpan::new(br#"w\u00e9-1"#);
        assert_eq!(span.unescape_to_string::<8>().unwrap().as_str(), "wé-1");
        assert_eq!(span.unescape_to_string::<4>(), Err(JsonError::BufferFull));
        assert_eq!(JsonSpan::new(br#"\q"#).unescape_to_string::<8>(), Err(JsonError::InvalidEscape));
    }

    #[test]
    fn test_malformed_span_never_matches() {
        let span = JsonSpan::new(br#"ab\q"#);
        assert!(!span.matches("ab"));
        let mut out = [0u8; 8];
        assert_eq!(span.unescape_into(&mut out), Err(JsonError::InvalidEscape));
    }
}
