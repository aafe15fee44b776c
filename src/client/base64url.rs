//! base64url codec used for credential ids, challenges, and signatures on
//! the wire. Encoding never emits padding; decoding accepts inputs with or
//! without trailing `=` so payloads from either convention round-trip.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

use crate::error::AuthError;

/// Encode bytes as unpadded base64url.
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode base64url input, tolerating any amount of trailing padding.
pub fn decode(input: &str) -> Result<Vec<u8>, AuthError> {
    URL_SAFE_NO_PAD
        .decode(input.trim_end_matches('='))
        .map_err(|e| AuthError::Transport(format!("invalid base64url payload: {e}")))
}
