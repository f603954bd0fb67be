/// Hex encoding and the canonical [`Identifier`] type.
///
/// Identifiers are the unit of presence tracking and delivery: upper-case
/// ASCII hex, even length, at most [`MAX_IDENTIFIER_LEN`] characters. They
/// come either verbatim from a candidate that already is ASCII hex, or from
/// hex-encoding arbitrary bytes with the `hex` crate.
use core::fmt;

use heapless::{String, Vec};
use thiserror::Error;

use crate::defaults::MAX_IDENTIFIER_LEN;

/// Input bytes hex-encoded per scratch buffer
const ENCODE_CHUNK: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HexError {
    #[error("odd number of hex digits")]
    OddLength,
    #[error("invalid hex digit at index {0}")]
    InvalidDigit(usize),
    #[error("output buffer full")]
    Capacity,
}

impl From<::hex::FromHexError> for HexError {
    fn from(e: ::hex::FromHexError) -> Self {
        match e {
            ::hex::FromHexError::InvalidHexCharacter { index, .. } => HexError::InvalidDigit(index),
            ::hex::FromHexError::OddLength => HexError::OddLength,
            ::hex::FromHexError::InvalidStringLength => HexError::Capacity,
        }
    }
}

/// Append the upper-case hex encoding of `bytes` to `out`.
///
/// Stops at the last whole byte that fits; returns the number of input bytes
/// encoded.
pub fn encode_upper<const N: usize>(bytes: &[u8], out: &mut String<N>) -> usize {
    let room = N.saturating_sub(out.len()) / 2;
    let bytes = &bytes[..bytes.len().min(room)];
    let mut scratch = [0u8; 2 * ENCODE_CHUNK];
    let mut encoded = 0;
    for chunk in bytes.chunks(ENCODE_CHUNK) {
        let digits = &mut scratch[..2 * chunk.len()];
        if ::hex::encode_to_slice(chunk, digits).is_err() {
            break;
        }
        digits.make_ascii_uppercase();
        for &d in digits.iter() {
            let _ = out.push(char::from(d));
        }
        encoded += chunk.len();
    }
    encoded
}

/// Decode a hex string (either case), appending the bytes to `out`. On error
/// `out` is left as it was.
pub fn decode<const N: usize>(hex: &str, out: &mut Vec<u8, N>) -> Result<(), HexError> {
    if hex.len() % 2 != 0 {
        return Err(HexError::OddLength);
    }
    let start = out.len();
    out.resize(start + hex.len() / 2, 0)
        .map_err(|_| HexError::Capacity)?;
    let result = ::hex::decode_to_slice(hex, &mut out[start..]);
    if result.is_err() {
        out.truncate(start);
    }
    result.map_err(HexError::from)
}

/// True for non-empty, even-length strings made only of hex digits.
pub fn is_ascii_hex(text: &[u8]) -> bool {
    !text.is_empty() && text.len() % 2 == 0 && text.iter().all(u8::is_ascii_hexdigit)
}

/// Append the printable ASCII characters of `bytes` (0x20..=0x7E) to `out`,
/// dropping everything else. Stops when `out` is full.
pub fn printable_ascii<const N: usize>(bytes: &[u8], out: &mut String<N>) {
    for &b in bytes {
        if (0x20..=0x7E).contains(&b) && out.push(b as char).is_err() {
            break;
        }
    }
}

/// Canonical identifier string
pub type IdString = String<MAX_IDENTIFIER_LEN>;

/// A detected payload, canonical upper-case ASCII hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(IdString);

impl Identifier {
    /// Accept `text` verbatim if it is ASCII hex. Longer inputs are truncated
    /// to [`MAX_IDENTIFIER_LEN`] before validation.
    pub fn parse(text: &[u8]) -> Option<Self> {
        let text = &text[..text.len().min(MAX_IDENTIFIER_LEN)];
        if !is_ascii_hex(text) {
            return None;
        }
        let mut id = IdString::new();
        for &b in text {
            let _ = id.push(b.to_ascii_uppercase() as char);
        }
        Some(Self(id))
    }

    /// Hex-encode arbitrary bytes, truncated to [`MAX_IDENTIFIER_LEN`] digits.
    pub fn encode(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }
        let mut id = IdString::new();
        encode_upper(bytes, &mut id);
        Some(Self(id))
    }

    /// Candidate text that already is ASCII hex is used verbatim, anything else
    /// is hex-encoded.
    pub fn from_candidate(text: &[u8]) -> Option<Self> {
        Self::parse(text).or_else(|| Self::encode(text))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}
