//! JSON glue over `serde-json-core`
//!
//! Requests, manifests and JOSE headers are deserialized with
//! `serde_json_core::from_slice`, which borrows string values from the input
//! with their escapes intact. `JsonSpan` wraps those borrowed bytes and
//! resolves escapes on demand. Reported documents are serialized with
//! `serde_json_core::to_slice` straight into caller buffers.
//!
//! - **`span`**: `JsonSpan` views and escape handling
//! - **`de`**: serde helpers for nullable strings and bounded object maps
//!
//! ## Memory Model
//!
//! Nothing here allocates. Deserialized values borrow from their input,
//! serialization fails with `AduError::InsufficientBuffer` instead of
//! growing, and the only mutation of input data is `unescape_in_place`,
//! which never lengthens a string.

pub mod de;
pub mod span;

pub use span::{unescape_in_place, JsonSpan, Unescaped};

use serde::{Deserialize, Serialize};

use crate::error::AduError;

/// Escape handling errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum JsonError {
    /// Invalid escape sequence inside a string
    InvalidEscape,
    /// Output buffer too short for the unescaped text
    BufferFull,
}

impl core::fmt::Display for JsonError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidEscape => write!(f, "Invalid JSON escape sequence"),
            Self::BufferFull => write!(f, "JSON output buffer full"),
        }
    }
}

impl core::error::Error for JsonError {}

/// Deserialize one complete document, borrowing strings from `input`
///
/// Anything but whitespace after the top-level value is rejected.
pub(crate) fn from_slice<'a, T: Deserialize<'a>>(input: &'a [u8]) -> Result<T, AduError> {
    match serde_json_core::from_slice::<T>(input) {
        Ok((value, consumed)) => finish(input, consumed).map(|()| value),
        Err(_) => Err(AduError::ParseFailed),
    }
}

/// Deserialize one complete document, unescaping strings through `scratch`
///
/// For targets that own their text, such as `heapless::String`.
pub(crate) fn from_slice_escaped<'a, T: Deserialize<'a>>(
    input: &'a [u8],
    scratch: &mut [u8],
) -> Result<T, AduError> {
    match serde_json_core::from_slice_escaped::<T>(input, scratch) {
        Ok((value, consumed)) => finish(input, consumed).map(|()| value),
        Err(_) => Err(AduError::ParseFailed),
    }
}

fn finish(input: &[u8], consumed: usize) -> Result<(), AduError> {
    match input.get(consumed..) {
        Some(rest) if rest.iter().all(|b| matches!(b, b' ' | b'\t' | b'\n' | b'\r')) => Ok(()),
        _ => Err(AduError::ParseFailed),
    }
}

/// Serialize `value` into `out`
///
/// # Returns
///
/// The number of bytes written, or `AduError::InsufficientBuffer`.
pub(crate) fn to_slice<T: Serialize + ?Sized>(value: &T, out: &mut [u8]) -> Result<usize, AduError> {
    serde_json_core::to_slice(value, out).map_err(|_| AduError::InsufficientBuffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq, Deserialize)]
    #[serde(default)]
    struct Pair<'a> {
        #[serde(borrow)]
        name: JsonSpan<'a>,
        size: i64,
    }

    #[test]
    fn test_from_slice_borrows_raw_strings() {
        let input = br#" {"name":"a\/b","size":-1,"other":[1,{"x":"}"}]} "#;
        let pair: Pair<'_> = from_slice(input).unwrap();
        assert_eq!(pair.name.as_bytes(), br#"a\/b"#);
        assert!(pair.name.matches("a/b"));
        assert_eq!(pair.size, -1);
    }

    #[test]
    fn test_from_slice_rejects_trailing_content() {
        assert_eq!(from_slice::<Pair<'_>>(br#"{"size":1} {}"#), Err(AduError::ParseFailed));
        assert_eq!(from_slice::<Pair<'_>>(br#"{"size":1"#), Err(AduError::ParseFailed));
        assert!(from_slice::<Pair<'_>>(b"{}\r\n").is_ok());
    }

    #[test]
    fn test_to_slice_reports_short_buffers() {
        #[derive(Serialize)]
        struct Body<'a> {
            text: &'a str,
        }
        let mut out = [0u8; 32];
        let len = to_slice(&Body { text: "a\"b" }, &mut out).unwrap();
        assert_eq!(&out[..len], br#"{"text":"a\"b"}"#);

        let mut small = [0u8; 8];
        assert_eq!(to_slice(&Body { text: "a\"b" }, &mut small), Err(AduError::InsufficientBuffer));
    }
}
