//! JWT shaping and signing for issued tokens.
//!
//! Access tokens carry the full claim set; refresh tokens are
//! deliberately thin (`iss`, `aud`, `iat`, `exp`, `jti`) and confer no
//! access by themselves. The store remains the source of truth for
//! token state; these values are what clients and resource servers see.

use crate::errors::AuthError;
use crate::models::{AccessToken, RefreshToken};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Claims for an issued access token.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    pub jti: String,
    pub scope: String,
    #[serde(flatten, default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Claims for an issued refresh token.
#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    pub jti: String,
}

/// Holds the HS256 signing key and issuer identity for JWT operations.
#[derive(Clone)]
pub struct JwtKeys {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
}

impl JwtKeys {
    /// Build keys from the configured HMAC secret. An empty secret is
    /// replaced with a random one, so signed values do not survive a
    /// restart in that setup.
    pub fn from_secret(secret: &str, issuer: &str) -> Self {
        let secret = if secret.is_empty() {
            let random: [u8; 32] = rand::thread_rng().gen();
            random.to_vec()
        } else {
            secret.as_bytes().to_vec()
        };
        Self {
            encoding_key: EncodingKey::from_secret(&secret),
            decoding_key: DecodingKey::from_secret(&secret),
            issuer: issuer.trim_end_matches('/').to_string(),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Assemble the claim set for a stored access token.
    pub fn access_token_claims(
        &self,
        token: &AccessToken,
        subject: &str,
        scope: String,
    ) -> AccessTokenClaims {
        AccessTokenClaims {
            iss: self.issuer.clone(),
            sub: subject.to_string(),
            aud: token.client_id.clone(),
            iat: token.issued_at.timestamp(),
            exp: token.expiration.map(|exp| exp.timestamp()),
            jti: token.id.clone(),
            scope,
            extra: HashMap::new(),
        }
    }

    pub fn sign_access_token(&self, claims: &AccessTokenClaims) -> Result<String, AuthError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AuthError::internal(format!("Failed to sign access token: {}", e)))
    }

    /// Assemble and sign the thin claim set for a stored refresh token.
    pub fn sign_refresh_token(&self, token: &RefreshToken) -> Result<String, AuthError> {
        let claims = RefreshTokenClaims {
            iss: self.issuer.clone(),
            aud: token.client_id.clone(),
            iat: token.issued_at.timestamp(),
            exp: token.expiration.map(|exp| exp.timestamp()),
            jti: token.id.clone(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::internal(format!("Failed to sign refresh token: {}", e)))
    }

    /// Decode a signed access token without expiry enforcement.
    /// Store state governs token validity; this only checks the signature.
    #[cfg(test)]
    pub fn decode_access_token(&self, token: &str) -> AccessTokenClaims {
        let mut validation = jsonwebtoken::Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        jsonwebtoken::decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .expect("signed access token should decode")
            .claims
    }

    #[cfg(test)]
    pub fn decode_refresh_token(&self, token: &str) -> RefreshTokenClaims {
        let mut validation = jsonwebtoken::Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        jsonwebtoken::decode::<RefreshTokenClaims>(token, &self.decoding_key, &validation)
            .expect("signed refresh token should decode")
            .claims
    }
}
