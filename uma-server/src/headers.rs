//! Authorization header parsing for client and bearer credentials.

use axum::http::HeaderValue;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Client credentials presented through HTTP Basic authentication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl BasicCredentials {
    /// Parse an Authorization header of the form `Basic base64(id:secret)`.
    /// Returns `None` for a missing header, a different scheme or a
    /// malformed payload.
    pub fn from_header_value(value: Option<&HeaderValue>) -> Option<Self> {
        let raw = value.and_then(|v| v.to_str().ok())?;
        let (scheme, encoded) = raw.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("Basic") {
            return None;
        }
        let decoded = STANDARD.decode(encoded.trim()).ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (client_id, client_secret) = decoded.split_once(':')?;
        if client_id.is_empty() {
            return None;
        }
        Some(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        })
    }

    pub fn encode(client_id: &str, client_secret: &str) -> String {
        format!(
            "Basic {}",
            STANDARD.encode(format!("{}:{}", client_id, client_secret))
        )
    }
}

/// Extract the token from a `Bearer` Authorization header
pub fn bearer_token(value: Option<&HeaderValue>) -> Option<&str> {
    let raw = value.and_then(|v| v.to_str().ok())?;
    let (scheme, token) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("Bearer") || token.is_empty() {
        return None;
    }
    Some(token)
}
