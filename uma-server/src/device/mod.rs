//! Device authorization grant state machine.
//!
//! A device entry is pending until the resource owner approves it on the
//! verification screen, then consumed exactly once by the polling token
//! request. Lookups at the token endpoint are bound to the owning
//! client, so a foreign client polling a leaked device code sees only
//! an invalid grant.

use crate::clients::ClientDirectory;
use crate::errors::AuthError;
use crate::models::{AuthenticationHolder, DeviceCode, GRANT_DEVICE_CODE};
use crate::store::CredentialStore;
use chrono::{Duration, Utc};
use log::{debug, warn};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

const USER_CODE_LENGTH: usize = 8;

#[derive(Clone)]
pub struct DeviceCodeService {
    store: Arc<dyn CredentialStore>,
    clients: Arc<dyn ClientDirectory>,
    default_ttl: Duration,
}

impl DeviceCodeService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        clients: Arc<dyn ClientDirectory>,
        default_ttl_seconds: i64,
    ) -> Self {
        Self {
            store,
            clients,
            default_ttl: Duration::seconds(default_ttl_seconds),
        }
    }

    /// Open a pending device authorization for the client.
    pub async fn create(
        &self,
        client_id: &str,
        scope: HashSet<String>,
        request_parameters: HashMap<String, String>,
    ) -> Result<DeviceCode, AuthError> {
        let client = self.clients.load_by_client_id(client_id).await?;
        if !client.grant_types.contains(GRANT_DEVICE_CODE) {
            return Err(AuthError::invalid_client(
                "Client is not registered for the device grant",
            ));
        }

        let now = Utc::now();
        let ttl = client
            .device_code_validity_seconds
            .filter(|secs| *secs > 0)
            .map(Duration::seconds)
            .unwrap_or(self.default_ttl);

        let device = DeviceCode {
            device_code: Uuid::new_v4().to_string(),
            user_code: random_user_code(),
            client_id: client.client_id.clone(),
            scope,
            request_parameters,
            expiration: Some(now + ttl),
            created_at: now,
            approved: false,
            auth_holder_id: None,
        };
        self.store.save_device_code(&device).await?;
        debug!(
            "Opened device authorization {} for client {}",
            device.user_code, client.client_id
        );
        Ok(device)
    }

    /// Resolve a user code for the interactive approval screen.
    /// Read-only; an expired entry resolves to nothing.
    pub async fn lookup_by_user_code(
        &self,
        user_code: &str,
    ) -> Result<Option<DeviceCode>, AuthError> {
        let found = self.store.get_device_code_by_user_code(user_code).await?;
        Ok(found.filter(|d| !d.is_expired(Utc::now())))
    }

    /// Attach the approving user's frozen authentication and mark the
    /// entry approved.
    pub async fn approve(
        &self,
        device_code: &str,
        client_id: &str,
        authentication: &AuthenticationHolder,
    ) -> Result<DeviceCode, AuthError> {
        let mut device = self
            .store
            .get_device_code(device_code, client_id)
            .await?
            .ok_or_else(|| AuthError::not_found("Unknown device code"))?;
        if device.is_expired(Utc::now()) {
            return Err(AuthError::expired_token());
        }

        let holder = authentication.duplicate();
        self.store.save_holder(&holder).await?;

        device.approved = true;
        device.auth_holder_id = Some(holder.id);
        self.store.save_device_code(&device).await?;
        Ok(device)
    }

    /// The polling exchange at the token endpoint.
    ///
    /// Pending entries answer `authorization_pending` without state
    /// change; expired entries are removed and answer `expired_token`;
    /// an approved entry is consumed atomically, so concurrent polls
    /// mint at most one token.
    pub async fn redeem(
        &self,
        device_code: &str,
        client_id: &str,
    ) -> Result<AuthenticationHolder, AuthError> {
        let Some(device) = self.store.get_device_code(device_code, client_id).await? else {
            return Err(AuthError::invalid_grant("Device code is invalid"));
        };

        if device.is_expired(Utc::now()) {
            self.store.delete_device_code(device_code, client_id).await?;
            return Err(AuthError::expired_token());
        }
        if !device.approved {
            return Err(AuthError::authorization_pending());
        }

        let Some(consumed) = self.store.consume_device_code(device_code, client_id).await? else {
            return Err(AuthError::invalid_grant("Device code is invalid"));
        };
        let holder_id = consumed
            .auth_holder_id
            .as_deref()
            .ok_or_else(|| AuthError::internal("Approved device code has no authentication"))?;
        self.store
            .get_holder(holder_id)
            .await?
            .ok_or_else(|| AuthError::internal("Authentication for the device code is missing"))
    }

    /// Delete every device entry past its expiration.
    pub async fn sweep_expired(&self) -> Result<u64, AuthError> {
        let mut removed = 0;
        for device in self.store.expired_device_codes(Utc::now()).await? {
            match self
                .store
                .delete_device_code(&device.device_code, &device.client_id)
                .await
            {
                Ok(()) => removed += 1,
                Err(err) => warn!("Failed to remove expired device code: {}", err),
            }
        }
        Ok(removed)
    }
}

fn random_user_code() -> String {
    let mut rng = rand::thread_rng();
    (0..USER_CODE_LENGTH)
        .map(|_| rng.gen_range('A'..='Z'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::registry::ClientRegistry;
    use crate::models::{ClientDetails, Principal};
    use crate::scope::ScopeCatalog;
    use crate::store::memory::InMemoryStore;

    fn fixture() -> (DeviceCodeService, Arc<InMemoryStore>, Arc<ClientRegistry>) {
        let store = Arc::new(InMemoryStore::new());
        let registry = Arc::new(ClientRegistry::new(ScopeCatalog::new()));
        let service = DeviceCodeService::new(store.clone(), registry.clone(), 600);
        (service, store, registry)
    }

    fn seed_device_client(registry: &ClientRegistry, id: &str, validity: Option<i64>) {
        let mut client = ClientDetails::new(id);
        client.grant_types.insert(GRANT_DEVICE_CODE.to_string());
        client.device_code_validity_seconds = validity;
        registry.seed(client).unwrap();
    }

    async fn open(service: &DeviceCodeService, client_id: &str) -> DeviceCode {
        service
            .create(
                client_id,
                ["openid".to_string()].into_iter().collect(),
                HashMap::new(),
            )
            .await
            .unwrap()
    }

    fn approval() -> AuthenticationHolder {
        AuthenticationHolder::new(
            Principal::new("alice"),
            "tv-app",
            ["openid".to_string()].into_iter().collect(),
        )
    }

    #[tokio::test]
    async fn test_full_device_flow() {
        let (service, _store, registry) = fixture();
        seed_device_client(&registry, "tv-app", None);

        let device = open(&service, "tv-app").await;
        assert!(!device.approved);
        assert_eq!(device.user_code.len(), USER_CODE_LENGTH);
        assert!(device.user_code.chars().all(|c| c.is_ascii_uppercase()));

        let found = service
            .lookup_by_user_code(&device.user_code)
            .await
            .unwrap()
            .expect("pending entry visible to the approval screen");
        assert_eq!(found.device_code, device.device_code);

        service
            .approve(&device.device_code, "tv-app", &approval())
            .await
            .unwrap();

        let holder = service.redeem(&device.device_code, "tv-app").await.unwrap();
        assert_eq!(holder.principal.username, "alice");

        // consumed: the entry is gone
        let err = service.redeem(&device.device_code, "tv-app").await.unwrap_err();
        assert_eq!(err.error, "invalid_grant");
    }

    #[tokio::test]
    async fn test_pending_entry_answers_authorization_pending() {
        let (service, store, registry) = fixture();
        seed_device_client(&registry, "tv-app", None);
        let device = open(&service, "tv-app").await;

        let err = service.redeem(&device.device_code, "tv-app").await.unwrap_err();
        assert_eq!(err.error, "authorization_pending");
        // polling must not consume the pending entry
        assert!(store
            .get_device_code(&device.device_code, "tv-app")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_expired_entry_answers_expired_token_and_is_removed() {
        let (service, store, registry) = fixture();
        seed_device_client(&registry, "tv-app", None);
        let short = DeviceCodeService::new(store.clone(), registry.clone(), -1);
        let device = open(&short, "tv-app").await;

        let err = service.redeem(&device.device_code, "tv-app").await.unwrap_err();
        assert_eq!(err.error, "expired_token");
        assert!(store
            .get_device_code(&device.device_code, "tv-app")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_foreign_client_cannot_redeem() {
        let (service, _store, registry) = fixture();
        seed_device_client(&registry, "tv-app", None);
        let device = open(&service, "tv-app").await;
        service
            .approve(&device.device_code, "tv-app", &approval())
            .await
            .unwrap();

        let err = service.redeem(&device.device_code, "intruder").await.unwrap_err();
        assert_eq!(err.error, "invalid_grant");
    }

    #[tokio::test]
    async fn test_concurrent_redeem_has_one_winner() {
        let (service, _store, registry) = fixture();
        seed_device_client(&registry, "tv-app", None);
        let device = open(&service, "tv-app").await;
        service
            .approve(&device.device_code, "tv-app", &approval())
            .await
            .unwrap();

        let a = {
            let service = service.clone();
            let code = device.device_code.clone();
            tokio::spawn(async move { service.redeem(&code, "tv-app").await })
        };
        let b = {
            let service = service.clone();
            let code = device.device_code.clone();
            tokio::spawn(async move { service.redeem(&code, "tv-app").await })
        };

        let outcomes = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    }

    #[tokio::test]
    async fn test_client_validity_overrides_default_ttl() {
        let (service, _store, registry) = fixture();
        seed_device_client(&registry, "tv-app", Some(60));
        let device = open(&service, "tv-app").await;

        let expiration = device.expiration.unwrap();
        let lifetime = expiration - device.created_at;
        assert_eq!(lifetime.num_seconds(), 60);
    }

    #[tokio::test]
    async fn test_client_without_device_grant_is_rejected() {
        let (service, _store, registry) = fixture();
        registry.seed(ClientDetails::new("web-only")).unwrap();
        let err = service
            .create("web-only", HashSet::new(), HashMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.error, "invalid_client");
    }

    #[tokio::test]
    async fn test_expired_entry_is_hidden_from_user_code_lookup() {
        let (service, store, registry) = fixture();
        seed_device_client(&registry, "tv-app", None);
        let short = DeviceCodeService::new(store.clone(), registry.clone(), -1);
        let device = open(&short, "tv-app").await;

        assert!(service
            .lookup_by_user_code(&device.user_code)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_entries() {
        let (service, store, registry) = fixture();
        seed_device_client(&registry, "tv-app", None);
        let short = DeviceCodeService::new(store.clone(), registry.clone(), -1);

        let dead = open(&short, "tv-app").await;
        let live = open(&service, "tv-app").await;

        let removed = service.sweep_expired().await.unwrap();
        assert_eq!(removed, 1);
        assert!(store
            .get_device_code(&dead.device_code, "tv-app")
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get_device_code(&live.device_code, "tv-app")
            .await
            .unwrap()
            .is_some());
    }
}
