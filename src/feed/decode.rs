//! Response body decoding for `Content-Encoding: gzip` and `deflate`.

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use std::borrow::Cow;
use std::io::Read;
use thiserror::Error;

/// A compressed payload could not be decoded.
///
/// Scoped to the one response it came from; the undecoded bytes are never
/// handed on in its place.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("gzip decoding failed: {0}")]
    Gzip(#[source] std::io::Error),
    #[error("deflate decoding failed: {0}")]
    Deflate(#[source] std::io::Error),
    /// Decoded output grew past the caller's limit; decoding stopped there
    #[error("decoded body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// Decodes `bytes` according to a `Content-Encoding` label.
///
/// `gzip` / `x-gzip` are gunzipped. `deflate` is tried as zlib-wrapped first
/// and as raw DEFLATE second, since servers disagree on the framing. Absent,
/// `identity` and unknown labels pass the input through untouched.
///
/// Inflation never produces more than `limit + 1` bytes: a payload that
/// expands past `limit` fails with [`DecodeError::TooLarge`].
pub fn decode_content<'a>(
    encoding: Option<&str>,
    bytes: &'a [u8],
    limit: usize,
) -> Result<Cow<'a, [u8]>, DecodeError> {
    let label = encoding.map(|e| e.trim().to_ascii_lowercase());

    let decoded = match label.as_deref() {
        Some("gzip") | Some("x-gzip") => {
            read_capped(GzDecoder::new(bytes), limit).map_err(DecodeError::Gzip)?
        }
        Some("deflate") => match read_capped(ZlibDecoder::new(bytes), limit) {
            Ok(decoded) => decoded,
            Err(_) => read_capped(DeflateDecoder::new(bytes), limit).map_err(DecodeError::Deflate)?,
        },
        Some(other) if !other.is_empty() && other != "identity" => {
            tracing::debug!(encoding = %other, "Unknown content encoding, passing body through");
            return Ok(Cow::Borrowed(bytes));
        }
        _ => return Ok(Cow::Borrowed(bytes)),
    };

    if decoded.len() > limit {
        return Err(DecodeError::TooLarge { limit });
    }
    Ok(Cow::Owned(decoded))
}

fn read_capped(reader: impl Read, limit: usize) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    reader
        .take((limit as u64).saturating_add(1))
        .read_to_end(&mut out)?;
    Ok(out)
}
