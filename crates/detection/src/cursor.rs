//! Opaque pagination cursor codec.
//!
//! A cursor is a sort-key tuple (primary sort value, tie-break sequence)
//! encoded as base64 JSON so callers can pass it around as an opaque token
//! in `after`/`before` query parameters.

use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64;
use base64::Engine;
use serde_json::Value;

use crate::error::DetectionError;

/// Encode a sort-key tuple into an opaque cursor token.
pub fn encode_cursor(sort_values: &[Value]) -> String {
    // Serializing a slice of Values cannot fail.
    let json = serde_json::to_vec(sort_values).unwrap_or_default();
    BASE64.encode(json)
}

/// Decode an opaque cursor token back into its sort-key tuple.
pub fn decode_cursor(token: &str) -> Result<Vec<Value>, DetectionError> {
    let bytes = BASE64
        .decode(token)
        .map_err(|e| DetectionError::Cursor(e.to_string()))?;
    let values: Vec<Value> =
        serde_json::from_slice(&bytes).map_err(|e| DetectionError::Cursor(e.to_string()))?;
    if values.is_empty() {
        return Err(DetectionError::Cursor("empty sort-key tuple".to_string()));
    }
    Ok(values)
}
