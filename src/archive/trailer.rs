//! Fixed-size trailer at the end of a self-extracting binary.
//!
//! The trailer is exactly [`TRAILER_LEN`] ASCII decimal digits, left-padded
//! with zeros, holding the byte length of the compressed archive that sits
//! immediately before it.

use crate::config::types::{ParkerError, Result};

pub const TRAILER_LEN: usize = 16;

/// Largest archive length the trailer can express.
pub const MAX_ARCHIVE_LEN: u64 = 9_999_999_999_999_999;

/// Encode an archive length as a zero-padded 16-byte decimal string.
pub fn encode(len: u64) -> Result<[u8; TRAILER_LEN]> {
    if len > MAX_ARCHIVE_LEN {
        return Err(ParkerError::Build(format!(
            "archive length {} does not fit in a {}-digit trailer",
            len, TRAILER_LEN
        )));
    }

    let text = format!("{:0width$}", len, width = TRAILER_LEN);
    let mut out = [0u8; TRAILER_LEN];
    out.copy_from_slice(text.as_bytes());
    Ok(out)
}

/// Decode a trailer. Every byte must be an ASCII digit and the value must be positive.
pub fn decode(raw: &[u8]) -> Result<u64> {
    if raw.len() != TRAILER_LEN {
        return Err(ParkerError::TrailerCorrupt(format!(
            "expected {} bytes, got {}",
            TRAILER_LEN,
            raw.len()
        )));
    }

    if !raw.iter().all(u8::is_ascii_digit) {
        return Err(ParkerError::TrailerCorrupt(format!(
            "non-decimal trailer {:?}",
            String::from_utf8_lossy(raw)
        )));
    }

    // 16 digits always fit in u64
    let value = raw
        .iter()
        .fold(0u64, |acc, digit| acc * 10 + u64::from(digit - b'0'));

    if value == 0 {
        return Err(ParkerError::TrailerCorrupt("archive length is zero".to_string()));
    }

    Ok(value)
}
