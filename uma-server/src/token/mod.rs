//! Token lifecycle: issuance, refresh, revocation and expiry sweeps.
//!
//! Every path runs through the credential store; a token that is past
//! its expiration is treated as absent on the next read and revoked on
//! the spot. Refresh rotation is gated on the store's atomic consume so
//! concurrent refreshes of one token cannot both succeed.

use crate::clients::ClientDirectory;
use crate::errors::AuthError;
use crate::models::{
    AccessToken, AuthenticationHolder, ClientDetails, Permission, RefreshToken,
    SCOPE_OFFLINE_ACCESS,
};
use crate::scope::{join_scope_param, ScopeCatalog};
use crate::store::CredentialStore;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

pub mod enhancer;
pub mod jwt;

use enhancer::EnhancerRegistry;
use jwt::JwtKeys;

/// An access token together with the refresh token attached to it, if any.
#[derive(Debug)]
pub struct IssuedToken {
    pub access_token: AccessToken,
    pub refresh_token: Option<RefreshToken>,
}

#[derive(Clone)]
pub struct TokenService {
    store: Arc<dyn CredentialStore>,
    clients: Arc<dyn ClientDirectory>,
    scopes: Arc<ScopeCatalog>,
    keys: JwtKeys,
    enhancers: EnhancerRegistry,
}

impl TokenService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        clients: Arc<dyn ClientDirectory>,
        scopes: Arc<ScopeCatalog>,
        keys: JwtKeys,
    ) -> Self {
        Self {
            store,
            clients,
            scopes,
            keys,
            enhancers: EnhancerRegistry::standard(),
        }
    }

    pub fn with_enhancers(mut self, enhancers: EnhancerRegistry) -> Self {
        self.enhancers = enhancers;
        self
    }

    pub fn keys(&self) -> &JwtKeys {
        &self.keys
    }

    /// Exchange a granted authentication for an access token, verifying
    /// the PKCE contract when the original request carried a challenge.
    /// A companion refresh token is minted when the client allows
    /// refreshing and the granted scope includes offline access.
    pub async fn create_access_token(
        &self,
        authentication: &AuthenticationHolder,
        code_verifier: Option<&str>,
    ) -> Result<IssuedToken, AuthError> {
        let client = self.clients.load_by_client_id(&authentication.client_id).await?;
        verify_pkce(authentication, code_verifier)?;

        let scope = self.scopes.strip_reserved(&authentication.scope);

        let holder = authentication.duplicate();
        self.store.save_holder(&holder).await?;

        let refresh_token = if client.allow_refresh() && scope.contains(SCOPE_OFFLINE_ACCESS) {
            Some(self.mint_refresh_token(&client, &holder.id).await?)
        } else {
            None
        };

        let access_token = self
            .mint_access_token(
                &client,
                &holder,
                scope,
                Vec::new(),
                refresh_token.as_ref().map(|rt| rt.id.clone()),
            )
            .await?;

        Ok(IssuedToken {
            access_token,
            refresh_token,
        })
    }

    /// Mint a requesting-party token: scope is the matched policy's scope
    /// set and the granted permission is carried for introspection.
    pub async fn create_rpt(
        &self,
        authentication: &AuthenticationHolder,
        scope: HashSet<String>,
        permission: Permission,
    ) -> Result<AccessToken, AuthError> {
        let client = self.clients.load_by_client_id(&authentication.client_id).await?;

        let holder = authentication.duplicate();
        self.store.save_holder(&holder).await?;

        self.mint_access_token(&client, &holder, scope, vec![permission], None)
            .await
    }

    /// Exchange a refresh token for a new access token.
    ///
    /// The requesting client must own the token; a mismatch destroys the
    /// refresh token outright. Requested scope may only narrow the
    /// originally granted scope. Unless the client reuses refresh tokens,
    /// the presented token is atomically consumed and a fresh one issued.
    pub async fn refresh_access_token(
        &self,
        refresh_token_value: &str,
        requesting_client_id: &str,
        requested_scope: Option<HashSet<String>>,
    ) -> Result<IssuedToken, AuthError> {
        let refresh = self
            .get_refresh_token(refresh_token_value)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("Refresh token is invalid"))?;

        if refresh.client_id != requesting_client_id {
            warn!(
                "Client {} presented a refresh token owned by {}; destroying it",
                requesting_client_id, refresh.client_id
            );
            self.store.delete_refresh_token(&refresh.value).await?;
            return Err(AuthError::invalid_client(
                "Refresh token does not belong to this client",
            ));
        }

        let client = self.clients.load_by_client_id(requesting_client_id).await?;
        if !client.allow_refresh() {
            return Err(AuthError::invalid_client(
                "Client does not allow refreshing access tokens",
            ));
        }

        let holder = self
            .store
            .get_holder(&refresh.auth_holder_id)
            .await?
            .ok_or_else(|| {
                AuthError::internal("Authentication for the refresh token is missing")
            })?;

        let original_scope = self.scopes.strip_reserved(&holder.scope);
        let scope = match requested_scope.filter(|s| !s.is_empty()) {
            Some(requested) => {
                if !requested.is_subset(&original_scope) {
                    return Err(AuthError::invalid_scope(
                        "Requested scope exceeds the originally granted scope",
                    ));
                }
                requested
            }
            None => original_scope,
        };

        let refresh_out = if client.reuse_refresh_token {
            refresh.clone()
        } else {
            // Atomic consume: of two concurrent rotations, one loses here.
            if self
                .store
                .consume_refresh_token(&refresh.value)
                .await?
                .is_none()
            {
                return Err(AuthError::invalid_grant("Refresh token is invalid"));
            }
            self.mint_refresh_token(&client, &refresh.auth_holder_id).await?
        };

        if client.clear_access_tokens_on_refresh {
            let chained = self
                .store
                .get_access_tokens_by_refresh_token(&refresh.id)
                .await?;
            for token in chained {
                self.store.delete_access_token(&token.value).await?;
            }
        }

        let access_token = self
            .mint_access_token(&client, &holder, scope, Vec::new(), Some(refresh_out.id.clone()))
            .await?;

        Ok(IssuedToken {
            access_token,
            refresh_token: Some(refresh_out),
        })
    }

    /// Look up an access token, lazily revoking it when expired.
    pub async fn get_access_token(&self, value: &str) -> Result<Option<AccessToken>, AuthError> {
        match self.store.get_access_token_by_value(value).await? {
            Some(token) if token.is_expired(Utc::now()) => {
                debug!("Access token {} expired; revoking on read", token.id);
                self.revoke_access_token(&token).await?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Look up a refresh token, lazily revoking it when expired.
    pub async fn get_refresh_token(&self, value: &str) -> Result<Option<RefreshToken>, AuthError> {
        match self.store.get_refresh_token_by_value(value).await? {
            Some(token) if token.is_expired(Utc::now()) => {
                debug!("Refresh token {} expired; revoking on read", token.id);
                self.revoke_refresh_token(&token).await?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    pub async fn revoke_access_token(&self, token: &AccessToken) -> Result<(), AuthError> {
        self.store.delete_access_token(&token.value).await?;
        Ok(())
    }

    /// Revoking a refresh token clears every access token issued against it.
    pub async fn revoke_refresh_token(&self, token: &RefreshToken) -> Result<(), AuthError> {
        let chained = self
            .store
            .get_access_tokens_by_refresh_token(&token.id)
            .await?;
        for access in chained {
            self.store.delete_access_token(&access.value).await?;
        }
        self.store.delete_refresh_token(&token.value).await?;
        Ok(())
    }

    /// Periodic sweep: drop double-persisted tokens, revoke everything
    /// past expiration, then collect authentication holders no longer
    /// referenced by any code or token. Individual removal failures are
    /// logged and do not stop the pass.
    pub async fn clear_expired_tokens(&self) -> Result<u64, AuthError> {
        let now = Utc::now();
        let mut removed: u64 = 0;

        for duplicate in self.store.duplicate_access_tokens().await? {
            match self.store.delete_access_token(&duplicate.value).await {
                Ok(()) => removed += 1,
                Err(err) => warn!(
                    "Failed to remove duplicate access token {}: {}",
                    duplicate.id, err
                ),
            }
        }

        for token in self.store.expired_access_tokens(now).await? {
            match self.revoke_access_token(&token).await {
                Ok(()) => removed += 1,
                Err(err) => warn!("Failed to revoke expired access token {}: {}", token.id, err),
            }
        }

        for token in self.store.expired_refresh_tokens(now).await? {
            match self.revoke_refresh_token(&token).await {
                Ok(()) => removed += 1,
                Err(err) => warn!(
                    "Failed to revoke expired refresh token {}: {}",
                    token.id, err
                ),
            }
        }

        for holder_id in self.store.orphaned_holders().await? {
            match self.store.delete_holder(&holder_id).await {
                Ok(()) => removed += 1,
                Err(err) => warn!("Failed to remove orphaned holder {}: {}", holder_id, err),
            }
        }

        if removed > 0 {
            info!("Token sweep removed {} records", removed);
        }
        Ok(removed)
    }

    async fn mint_refresh_token(
        &self,
        client: &ClientDetails,
        holder_id: &str,
    ) -> Result<RefreshToken, AuthError> {
        let now = Utc::now();
        let mut refresh = RefreshToken {
            value: String::new(),
            id: Uuid::new_v4().to_string(),
            client_id: client.client_id.clone(),
            auth_holder_id: holder_id.to_string(),
            expiration: expiry_from(client.refresh_token_validity_seconds, now),
            issued_at: now,
        };
        refresh.value = self.keys.sign_refresh_token(&refresh)?;
        self.store.save_refresh_token(&refresh).await?;
        Ok(refresh)
    }

    async fn mint_access_token(
        &self,
        client: &ClientDetails,
        holder: &AuthenticationHolder,
        scope: HashSet<String>,
        permissions: Vec<Permission>,
        refresh_token_id: Option<String>,
    ) -> Result<AccessToken, AuthError> {
        let now = Utc::now();
        let mut token = AccessToken {
            value: String::new(),
            id: Uuid::new_v4().to_string(),
            client_id: client.client_id.clone(),
            auth_holder_id: holder.id.clone(),
            scope,
            expiration: expiry_from(client.access_token_validity_seconds, now),
            issued_at: now,
            refresh_token_id,
            approved_site: None,
            permissions,
        };

        let mut claims = self.keys.access_token_claims(
            &token,
            &holder.principal.username,
            join_scope_param(&token.scope),
        );
        self.enhancers.enhance_all(&mut claims, &token, holder);
        token.value = self.keys.sign_access_token(&claims)?;

        self.store.save_access_token(&token).await?;
        Ok(token)
    }
}

fn expiry_from(validity_seconds: Option<i64>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    validity_seconds
        .filter(|secs| *secs > 0)
        .map(|secs| now + Duration::seconds(secs))
}

/// Enforce the PKCE contract frozen into the original authorization
/// request. A missing method defaults to `plain`.
fn verify_pkce(
    authentication: &AuthenticationHolder,
    code_verifier: Option<&str>,
) -> Result<(), AuthError> {
    let Some(challenge) = authentication.code_challenge() else {
        return Ok(());
    };
    let Some(verifier) = code_verifier else {
        return Err(AuthError::invalid_request("A code_verifier is required"));
    };

    let matches = match authentication.code_challenge_method().unwrap_or("plain") {
        "plain" => verifier == challenge,
        "S256" => {
            let digest = Sha256::digest(verifier.as_bytes());
            URL_SAFE_NO_PAD.encode(digest) == challenge
        }
        other => {
            return Err(AuthError::invalid_request(format!(
                "Unsupported code_challenge_method {}",
                other
            )))
        }
    };

    if matches {
        Ok(())
    } else {
        Err(AuthError::invalid_request("The code_verifier does not match"))
    }
}
