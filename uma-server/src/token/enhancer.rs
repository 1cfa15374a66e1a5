//! Token enhancer chain.
//!
//! Enhancers run after a token is assembled and before it is signed and
//! persisted, so they can stamp additional claims derived from the
//! authentication. They must not touch the registered JWT claims.

use super::jwt::AccessTokenClaims;
use crate::models::{AccessToken, AuthenticationHolder, EXT_CODE_CHALLENGE, EXT_CODE_CHALLENGE_METHOD};
use log::debug;
use std::sync::Arc;

const REGISTERED_CLAIMS: [&str; 7] = ["iss", "sub", "aud", "exp", "iat", "jti", "scope"];

pub trait TokenEnhancer: Send + Sync {
    fn name(&self) -> &'static str;

    fn enhance(
        &self,
        claims: &mut AccessTokenClaims,
        token: &AccessToken,
        holder: &AuthenticationHolder,
    );
}

/// Ordered chain of enhancers applied to every issued access token.
#[derive(Clone)]
pub struct EnhancerRegistry {
    enhancers: Vec<Arc<dyn TokenEnhancer>>,
}

impl EnhancerRegistry {
    pub fn empty() -> Self {
        Self {
            enhancers: Vec::new(),
        }
    }

    /// The default chain: carries request extensions into token claims.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(ExtensionClaimsEnhancer));
        registry
    }

    pub fn register(&mut self, enhancer: Arc<dyn TokenEnhancer>) {
        self.enhancers.push(enhancer);
    }

    pub fn enhance_all(
        &self,
        claims: &mut AccessTokenClaims,
        token: &AccessToken,
        holder: &AuthenticationHolder,
    ) {
        for enhancer in &self.enhancers {
            debug!("Applying token enhancer {}", enhancer.name());
            enhancer.enhance(claims, token, holder);
        }
    }
}

impl Default for EnhancerRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Copies authorization request extensions into the token's extra claims.
/// Registered claims and PKCE bookkeeping entries are never copied.
pub struct ExtensionClaimsEnhancer;

impl TokenEnhancer for ExtensionClaimsEnhancer {
    fn name(&self) -> &'static str {
        "extension-claims"
    }

    fn enhance(
        &self,
        claims: &mut AccessTokenClaims,
        _token: &AccessToken,
        holder: &AuthenticationHolder,
    ) {
        for (key, value) in &holder.extensions {
            if REGISTERED_CLAIMS.contains(&key.as_str()) {
                continue;
            }
            if key == EXT_CODE_CHALLENGE || key == EXT_CODE_CHALLENGE_METHOD {
                continue;
            }
            claims.extra.insert(key.clone(), value.clone());
        }
    }
}
