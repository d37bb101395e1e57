//! Client-side token inspection
//!
//! Tokens are treated as JWT-shaped bearer strings. The signature is never
//! checked here; only the payload claims needed for scheduling refreshes
//! (`exp`) and for display (`sub`) are decoded. Anything that cannot be
//! decoded is treated as expired.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use serde::Deserialize;

/// base64url, padding optional (servers disagree on whether to pad).
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Some issuers emit the standard alphabet in the payload segment.
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    exp: Option<i64>,
    #[serde(default)]
    sub: Option<serde_json::Value>,
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Token is non-empty and has exactly three `.`-separated segments.
pub fn is_well_formed(token: &str) -> bool {
    !token.is_empty() && token.split('.').count() == 3
}

fn decode_claims(token: &str) -> Option<Claims> {
    if !is_well_formed(token) {
        return None;
    }
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_LENIENT
        .decode(payload)
        .or_else(|_| STANDARD_LENIENT.decode(payload))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Expiry in epoch milliseconds, or `None` if the payload can't be decoded
/// or carries no integer `exp`.
pub fn decode_expiry(token: &str) -> Option<i64> {
    decode_claims(token)?.exp?.checked_mul(1000)
}

/// `sub` claim as a string (numeric subjects are stringified).
pub fn decode_subject(token: &str) -> Option<String> {
    match decode_claims(token)?.sub? {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Fails closed: an undecodable expiry counts as expired.
pub fn is_expired(token: &str, now_ms: i64) -> bool {
    match decode_expiry(token) {
        Some(expiry) => now_ms >= expiry,
        None => true,
    }
}

/// True once `now` is inside `window_ms` of the expiry.
pub fn is_expiring_soon(token: &str, now_ms: i64, window_ms: i64) -> bool {
    match decode_expiry(token) {
        Some(expiry) => now_ms >= expiry.saturating_sub(window_ms),
        None => true,
    }
}
