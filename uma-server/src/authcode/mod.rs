//! One-time authorization codes.
//!
//! A code freezes the authorization request into a holder snapshot and
//! can be redeemed exactly once. PKCE method agreement is enforced at
//! issuance; the challenge itself is verified at redemption by the
//! token service.

use crate::clients::ClientDirectory;
use crate::errors::AuthError;
use crate::models::{AuthenticationHolder, AuthorizationCode};
use crate::store::CredentialStore;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use log::{debug, warn};
use rand::RngCore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AuthCodeService {
    store: Arc<dyn CredentialStore>,
    clients: Arc<dyn ClientDirectory>,
    code_ttl: Duration,
}

impl AuthCodeService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        clients: Arc<dyn ClientDirectory>,
        code_ttl_seconds: i64,
    ) -> Self {
        Self {
            store,
            clients,
            code_ttl: Duration::seconds(code_ttl_seconds),
        }
    }

    /// Issue a single-use code for a granted authorization request.
    ///
    /// When the request carries a PKCE method it must agree with the
    /// method registered for the client; a mismatch fails the issuance.
    pub async fn create(&self, authentication: &AuthenticationHolder) -> Result<String, AuthError> {
        let client = self.clients.load_by_client_id(&authentication.client_id).await?;

        if let Some(method) = authentication.code_challenge_method() {
            if client.code_challenge_method.as_deref() != Some(method) {
                return Err(AuthError::invalid_request(format!(
                    "Client is not registered for code_challenge_method {}",
                    method
                )));
            }
        }

        let holder = authentication.duplicate();
        self.store.save_holder(&holder).await?;

        let code = AuthorizationCode {
            code: random_code(),
            auth_holder_id: holder.id.clone(),
            client_id: client.client_id.clone(),
            redirect_uri: authentication.redirect_uri.clone(),
            expiration: Utc::now() + self.code_ttl,
        };
        self.store.save_code(&code).await?;
        debug!("Issued authorization code for client {}", client.client_id);
        Ok(code.code)
    }

    /// Redeem a code: atomic find-and-delete, then resolve the frozen
    /// authentication. A second redemption of the same code fails.
    pub async fn consume(&self, code: &str) -> Result<AuthenticationHolder, AuthError> {
        let Some(stored) = self.store.consume_code(code).await? else {
            return Err(AuthError::invalid_grant("Authorization code is invalid"));
        };
        if stored.is_expired(Utc::now()) {
            return Err(AuthError::invalid_grant("Authorization code has expired"));
        }
        self.store
            .get_holder(&stored.auth_holder_id)
            .await?
            .ok_or_else(|| AuthError::internal("Authentication for the code is missing"))
    }

    /// Delete every code past its expiration. Returns the number removed.
    pub async fn sweep_expired(&self) -> Result<u64, AuthError> {
        let mut removed = 0;
        for code in self.store.expired_codes(Utc::now()).await? {
            match self.store.delete_code(&code.code).await {
                Ok(()) => removed += 1,
                Err(err) => warn!("Failed to remove expired code: {}", err),
            }
        }
        Ok(removed)
    }
}

/// 256 bits of entropy, base64url without padding.
fn random_code() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::registry::ClientRegistry;
    use crate::models::{ClientDetails, Principal};
    use crate::scope::ScopeCatalog;
    use crate::store::memory::InMemoryStore;

    fn fixture() -> (AuthCodeService, Arc<InMemoryStore>, Arc<ClientRegistry>) {
        let store = Arc::new(InMemoryStore::new());
        let registry = Arc::new(ClientRegistry::new(ScopeCatalog::new()));
        let service = AuthCodeService::new(store.clone(), registry.clone(), 300);
        (service, store, registry)
    }

    fn seed_client(registry: &ClientRegistry, id: &str, pkce_method: Option<&str>) {
        let mut client = ClientDetails::new(id);
        client.code_challenge_method = pkce_method.map(str::to_string);
        registry.seed(client).unwrap();
    }

    fn holder_for(client_id: &str) -> AuthenticationHolder {
        AuthenticationHolder::new(
            Principal::new("alice"),
            client_id,
            ["openid".to_string()].into_iter().collect(),
        )
    }

    #[tokio::test]
    async fn test_create_and_consume_round_trip() {
        let (service, _store, registry) = fixture();
        seed_client(&registry, "web-app", None);
        let mut holder = holder_for("web-app");
        holder.redirect_uri = Some("https://app.example/cb".to_string());

        let code = service.create(&holder).await.unwrap();
        assert_eq!(code.len(), 43);

        let resolved = service.consume(&code).await.unwrap();
        assert_eq!(resolved.client_id, "web-app");
        assert_eq!(resolved.principal.username, "alice");
        assert_eq!(resolved.scope, holder.scope);
        assert_eq!(resolved.redirect_uri.as_deref(), Some("https://app.example/cb"));
    }

    #[tokio::test]
    async fn test_second_consume_fails() {
        let (service, _store, registry) = fixture();
        seed_client(&registry, "web-app", None);
        let code = service.create(&holder_for("web-app")).await.unwrap();

        service.consume(&code).await.unwrap();
        let err = service.consume(&code).await.unwrap_err();
        assert_eq!(err.error, "invalid_grant");
    }

    #[tokio::test]
    async fn test_concurrent_consume_has_one_winner() {
        let (service, _store, registry) = fixture();
        seed_client(&registry, "web-app", None);
        let code = service.create(&holder_for("web-app")).await.unwrap();

        let a = {
            let service = service.clone();
            let code = code.clone();
            tokio::spawn(async move { service.consume(&code).await })
        };
        let b = {
            let service = service.clone();
            let code = code.clone();
            tokio::spawn(async move { service.consume(&code).await })
        };

        let outcomes = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    }

    #[tokio::test]
    async fn test_pkce_method_must_match_client_registration() {
        let (service, _store, registry) = fixture();
        seed_client(&registry, "plain-client", Some("plain"));
        seed_client(&registry, "unregistered", None);

        let mut holder = holder_for("plain-client");
        holder.extensions.insert(
            "code_challenge_method".to_string(),
            serde_json::json!("S256"),
        );
        let err = service.create(&holder).await.unwrap_err();
        assert_eq!(err.error, "invalid_request");

        let mut holder = holder_for("unregistered");
        holder.extensions.insert(
            "code_challenge_method".to_string(),
            serde_json::json!("S256"),
        );
        let err = service.create(&holder).await.unwrap_err();
        assert_eq!(err.error, "invalid_request");
    }

    #[tokio::test]
    async fn test_pkce_method_agreement_allows_issuance() {
        let (service, _store, registry) = fixture();
        seed_client(&registry, "pkce-app", Some("S256"));
        let mut holder = holder_for("pkce-app");
        holder.extensions.insert(
            "code_challenge_method".to_string(),
            serde_json::json!("S256"),
        );
        holder
            .extensions
            .insert("code_challenge".to_string(), serde_json::json!("challenge"));

        assert!(service.create(&holder).await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_code_cannot_be_redeemed() {
        let (service, store, registry) = fixture();
        seed_client(&registry, "web-app", None);
        let expiring = AuthCodeService::new(store.clone(), registry.clone(), -1);
        let code = expiring.create(&holder_for("web-app")).await.unwrap();

        let err = service.consume(&code).await.unwrap_err();
        assert_eq!(err.error, "invalid_grant");
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired_codes() {
        let (service, store, registry) = fixture();
        seed_client(&registry, "web-app", None);
        let expiring = AuthCodeService::new(store.clone(), registry.clone(), -1);

        let dead = expiring.create(&holder_for("web-app")).await.unwrap();
        let live = service.create(&holder_for("web-app")).await.unwrap();

        let removed = service.sweep_expired().await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_code(&dead).await.unwrap().is_none());
        assert!(store.get_code(&live).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_codes_are_unique() {
        let (service, _store, registry) = fixture();
        seed_client(&registry, "web-app", None);
        let first = service.create(&holder_for("web-app")).await.unwrap();
        let second = service.create(&holder_for("web-app")).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_unknown_client_cannot_get_a_code() {
        let (service, _store, _registry) = fixture();
        let err = service.create(&holder_for("ghost")).await.unwrap_err();
        assert_eq!(err.error, "invalid_client");
    }
}
