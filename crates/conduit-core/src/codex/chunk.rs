//! Decoding of low-level command output chunks.
//!
//! Older peers stream raw bytes base64-encoded, newer ones send text. There
//! is no flag telling the two apart, so a chunk is decoded only when it has
//! the exact shape of padded base64.

use std::sync::LazyLock;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use regex::Regex;

static BASE64_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9+/]+={0,2}$").unwrap());

/// Standard alphabet, tolerant of non-zero trailing bits so any
/// shape-matching chunk decodes.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Whether `chunk` looks like padded base64.
pub fn is_base64_shaped(chunk: &str) -> bool {
    chunk.len() % 4 == 0 && BASE64_SHAPE.is_match(chunk)
}

/// Text to emit for an output chunk.
///
/// Base64-shaped chunks are decoded (invalid UTF-8 is replaced); anything
/// else, including a chunk that fails to decode, passes through verbatim.
pub fn decode_output_chunk(chunk: &str) -> String {
    if !is_base64_shaped(chunk) {
        return chunk.to_string();
    }
    match LENIENT.decode(chunk) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(err) => {
            log::debug!("Output chunk looked like base64 but did not decode: {}", err);
            chunk.to_string()
        }
    }
}
