//! Base64 helpers for opaque signed-transaction payloads.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Decodes a standard-alphabet base64 string into raw bytes.
pub fn decode(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(input)
}

/// Encodes raw bytes as a standard-alphabet base64 string.
pub fn encode<T: AsRef<[u8]>>(input: T) -> String {
    STANDARD.encode(input.as_ref())
}
