//! JWT expiry arithmetic for the client token holder.

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::Deserialize;

use crate::events::QLightError;

/// Delay used when a token is already expired and must be refreshed right away.
pub const EXPIRED_TOKEN_RETRY_MS: u64 = 1_000;

#[derive(Deserialize)]
struct JwtClaims {
    #[serde(default)]
    exp: i64,
}

/// Milliseconds until `token` expires, negative once it has expired.
///
/// Anything before the first space (an auth scheme such as `Bearer`) is
/// ignored. Empty or non-JWT tokens carry no expiry and yield `0`.
pub fn token_expiration_delay_ms(token: &str, now_unix_ms: i64) -> Result<i64, QLightError> {
    if token.is_empty() {
        return Ok(0);
    }
    let token = match token.find(' ') {
        Some(idx) => &token[idx + 1..],
        None => token,
    };
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() <= 1 {
        return Ok(0);
    }

    let segment = parts[1].trim_end_matches('=');
    let claims = URL_SAFE_NO_PAD
        .decode(segment)
        .or_else(|_| STANDARD_NO_PAD.decode(segment))
        .map_err(|e| QLightError::Token(format!("decode base64: {}", e)))?;
    let claims: JwtClaims = serde_json::from_slice(&claims)
        .map_err(|e| QLightError::Token(format!("unmarshal JSON: {}", e)))?;

    Ok(claims.exp.saturating_mul(1000).saturating_sub(now_unix_ms))
}

/// A token needs a refresh once it expires within the anticipation window.
pub fn token_expired(expires_in_ms: i64, refresh_anticipation_ms: i64) -> bool {
    expires_in_ms < refresh_anticipation_ms
}

/// How long to wait before the next automatic refresh.
pub fn refresh_delay_ms(expires_in_ms: i64, refresh_anticipation_ms: i64) -> u64 {
    if expires_in_ms <= 0 {
        return EXPIRED_TOKEN_RETRY_MS;
    }
    expires_in_ms.saturating_sub(refresh_anticipation_ms).max(0) as u64
}

#[cfg(test)]
pub(crate) fn make_jwt(exp_unix_secs: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
    let claims = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{}}}"#, exp_unix_secs));
    format!("bearer {}.{}.sig", header, claims)
}
