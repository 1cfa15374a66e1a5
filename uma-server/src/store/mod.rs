use crate::models::{
    AccessToken, AuthenticationHolder, AuthorizationCode, DeviceCode, PermissionTicket,
    RefreshToken, ResourceSet,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

pub mod memory;
pub mod redis;

/// Errors that can occur during credential store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Failed to parse stored record: {0}")]
    Deserialization(String),
    #[error("Redis error: {0}")]
    Redis(String),
    #[error("Store call timed out: {0}")]
    Timeout(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Persistence contract for grants, tokens and UMA records.
///
/// Implementations must make `consume_*` an atomic find-and-delete per key:
/// two concurrent consumers of the same key see exactly one `Some`. Deletes
/// are idempotent; deleting an absent record is not an error. The bulk
/// `expired_*` queries back the maintenance sweeps and may be slower than
/// the keyed lookups.
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    // ------------------------- authorization codes -------------------------

    async fn save_code(&self, code: &AuthorizationCode) -> Result<(), StoreError>;

    async fn get_code(&self, code: &str) -> Result<Option<AuthorizationCode>, StoreError>;

    /// Atomically remove and return a code
    async fn consume_code(&self, code: &str) -> Result<Option<AuthorizationCode>, StoreError>;

    async fn delete_code(&self, code: &str) -> Result<(), StoreError>;

    async fn expired_codes(&self, as_of: DateTime<Utc>)
        -> Result<Vec<AuthorizationCode>, StoreError>;

    // ---------------------------- access tokens ----------------------------

    async fn save_access_token(&self, token: &AccessToken) -> Result<(), StoreError>;

    async fn get_access_token_by_value(
        &self,
        value: &str,
    ) -> Result<Option<AccessToken>, StoreError>;

    async fn get_access_token_by_id(&self, id: &str) -> Result<Option<AccessToken>, StoreError>;

    async fn delete_access_token(&self, value: &str) -> Result<(), StoreError>;

    /// All access tokens chained to a refresh token id
    async fn get_access_tokens_by_refresh_token(
        &self,
        refresh_token_id: &str,
    ) -> Result<Vec<AccessToken>, StoreError>;

    async fn expired_access_tokens(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<AccessToken>, StoreError>;

    /// Extra copies of tokens that share a token id; the sweep deletes these
    async fn duplicate_access_tokens(&self) -> Result<Vec<AccessToken>, StoreError>;

    // ---------------------------- refresh tokens ---------------------------

    async fn save_refresh_token(&self, token: &RefreshToken) -> Result<(), StoreError>;

    async fn get_refresh_token_by_value(
        &self,
        value: &str,
    ) -> Result<Option<RefreshToken>, StoreError>;

    /// Atomic find-and-delete used by refresh token rotation. Of two
    /// concurrent consumers of one value, exactly one receives the token.
    async fn consume_refresh_token(&self, value: &str)
        -> Result<Option<RefreshToken>, StoreError>;

    async fn delete_refresh_token(&self, value: &str) -> Result<(), StoreError>;

    async fn expired_refresh_tokens(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<RefreshToken>, StoreError>;

    // ------------------------- authentication holders ----------------------

    async fn save_holder(&self, holder: &AuthenticationHolder) -> Result<(), StoreError>;

    async fn get_holder(&self, id: &str) -> Result<Option<AuthenticationHolder>, StoreError>;

    async fn delete_holder(&self, id: &str) -> Result<(), StoreError>;

    /// Ids of holders no longer referenced by any code, token or device grant
    async fn orphaned_holders(&self) -> Result<Vec<String>, StoreError>;

    // ----------------------------- device codes ----------------------------

    async fn save_device_code(&self, device: &DeviceCode) -> Result<(), StoreError>;

    async fn get_device_code(
        &self,
        device_code: &str,
        client_id: &str,
    ) -> Result<Option<DeviceCode>, StoreError>;

    async fn get_device_code_by_user_code(
        &self,
        user_code: &str,
    ) -> Result<Option<DeviceCode>, StoreError>;

    /// Atomically remove and return a device grant owned by `client_id`
    async fn consume_device_code(
        &self,
        device_code: &str,
        client_id: &str,
    ) -> Result<Option<DeviceCode>, StoreError>;

    async fn delete_device_code(
        &self,
        device_code: &str,
        client_id: &str,
    ) -> Result<(), StoreError>;

    async fn expired_device_codes(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<DeviceCode>, StoreError>;

    // ----------------------------- resource sets ---------------------------

    async fn save_resource_set(&self, resource_set: &ResourceSet) -> Result<(), StoreError>;

    async fn get_resource_set(&self, id: &str) -> Result<Option<ResourceSet>, StoreError>;

    async fn get_resource_sets_for_owner(
        &self,
        owner: &str,
    ) -> Result<Vec<ResourceSet>, StoreError>;

    async fn delete_resource_set(&self, id: &str) -> Result<(), StoreError>;

    // --------------------------- permission tickets ------------------------

    async fn save_ticket(&self, ticket: &PermissionTicket) -> Result<(), StoreError>;

    async fn get_ticket(&self, ticket: &str) -> Result<Option<PermissionTicket>, StoreError>;

    /// Atomically remove and return a ticket
    async fn consume_ticket(&self, ticket: &str) -> Result<Option<PermissionTicket>, StoreError>;

    async fn delete_ticket(&self, ticket: &str) -> Result<(), StoreError>;

    async fn expired_tickets(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<PermissionTicket>, StoreError>;

    // -----------------------------------------------------------------------

    /// Deep health check against the backing store
    async fn health_check(&self) -> Result<(), String>;
}

/// Create the credential store selected by the configuration.
///
/// Returns the store behind an `Arc` so services can share it, or a
/// `StoreError` when initialization fails (bad URL, unreachable Redis).
pub async fn create_store(
    config: &crate::config::UmaConfig,
) -> Result<Arc<dyn CredentialStore>, StoreError> {
    match config.store.backend {
        crate::config::StoreBackend::InMemory => Ok(Arc::new(memory::InMemoryStore::new())),
        crate::config::StoreBackend::Redis => {
            if config.store.redis.url.is_empty() {
                return Err(StoreError::Config(
                    "Redis URL is required for the Redis store".to_string(),
                ));
            }
            let store =
                redis::RedisStore::new(&config.store.redis.url, config.store.redis.timeout)
                    .await
                    .map_err(StoreError::Config)?;
            Ok(Arc::new(store))
        }
    }
}
