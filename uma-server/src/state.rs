use crate::authcode::AuthCodeService;
use crate::clients::{create_directory, ClientDirectory};
use crate::config::UmaConfig;
use crate::device::DeviceCodeService;
use crate::errors::AuthError;
use crate::introspect::IntrospectionService;
use crate::models::ClientDetails;
use crate::scope::ScopeCatalog;
use crate::store::{create_store, CredentialStore};
use crate::token::jwt::JwtKeys;
use crate::token::TokenService;
use crate::uma::UmaService;
use log::warn;
use std::sync::Arc;
use std::time::Duration;

/// Shared application state: configuration, the credential store, the
/// client directory and the services assembled on top of them.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<UmaConfig>,
    pub store: Arc<dyn CredentialStore>,
    pub clients: Arc<dyn ClientDirectory>,
    pub scopes: Arc<ScopeCatalog>,
    pub tokens: TokenService,
    pub codes: AuthCodeService,
    pub devices: DeviceCodeService,
    pub uma: UmaService,
    pub introspection: IntrospectionService,
}

impl AppState {
    pub async fn new(config: UmaConfig) -> Result<Self, String> {
        let store = create_store(&config)
            .await
            .map_err(|e| format!("Failed to create credential store: {}", e))?;
        let scopes = Arc::new(ScopeCatalog::new());
        let clients = create_directory(&config, &scopes)
            .map_err(|e| format!("Failed to create client directory: {}", e))?;
        Ok(Self::assemble(config, store, clients, scopes))
    }

    /// Wire the services onto an existing store and directory.
    pub fn assemble(
        config: UmaConfig,
        store: Arc<dyn CredentialStore>,
        clients: Arc<dyn ClientDirectory>,
        scopes: Arc<ScopeCatalog>,
    ) -> Self {
        let keys = JwtKeys::from_secret(&config.tokens.secret, &config.issuer);
        let tokens = TokenService::new(store.clone(), clients.clone(), scopes.clone(), keys);
        let codes = AuthCodeService::new(store.clone(), clients.clone(), config.tokens.ttl.code);
        let devices =
            DeviceCodeService::new(store.clone(), clients.clone(), config.tokens.ttl.device);
        let uma = UmaService::new(
            store.clone(),
            scopes.clone(),
            tokens.clone(),
            &config.issuer,
            config.tokens.ttl.ticket,
        );
        let introspection = IntrospectionService::new(scopes.clone());
        Self {
            config: Arc::new(config),
            store,
            clients,
            scopes,
            tokens,
            codes,
            devices,
            uma,
            introspection,
        }
    }

    /// Authenticate a client by id and optional secret. A confidential
    /// client must present its exact secret; a public client carries none.
    pub async fn authenticate_client(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
    ) -> Result<ClientDetails, AuthError> {
        let client = self.clients.load_by_client_id(client_id).await?;
        match &client.client_secret {
            Some(expected) if client_secret == Some(expected.as_str()) => Ok(client),
            Some(_) => Err(AuthError::invalid_client("Invalid client credentials")),
            None => Ok(client),
        }
    }

    /// Check that the backing store answers within the configured window
    pub async fn health_check(&self) -> bool {
        let timeout = Duration::from_secs_f64(self.config.health.timeout);
        match tokio::time::timeout(timeout, self.store.health_check()).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!("Store health check failed: {}", err);
                false
            }
            Err(_) => {
                warn!("Store health check timed out");
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clients::registry::ClientRegistry;
    use crate::store::memory::InMemoryStore;

    pub(crate) struct TestState {
        pub state: AppState,
        pub registry: Arc<ClientRegistry>,
        pub store: Arc<InMemoryStore>,
    }

    /// In-memory state for tests, with handles to seed clients and
    /// inspect the store directly.
    pub(crate) fn create_test_state() -> TestState {
        let config = UmaConfig::for_testing();
        let store = Arc::new(InMemoryStore::new());
        let registry = Arc::new(ClientRegistry::new(ScopeCatalog::new()));
        let state = AppState::assemble(
            config,
            store.clone(),
            registry.clone(),
            Arc::new(ScopeCatalog::new()),
        );
        TestState {
            state,
            registry,
            store,
        }
    }

    #[tokio::test]
    async fn test_clone_shares_the_underlying_state() {
        let TestState { state, .. } = create_test_state();
        let copy = state.clone();
        assert_eq!(Arc::as_ptr(&state.config), Arc::as_ptr(&copy.config));
        assert_eq!(Arc::as_ptr(&state.scopes), Arc::as_ptr(&copy.scopes));
    }

    #[tokio::test]
    async fn test_in_memory_store_reports_healthy() {
        let TestState { state, .. } = create_test_state();
        assert!(state.health_check().await);
    }

    #[tokio::test]
    async fn test_confidential_client_requires_its_secret() {
        let TestState { state, registry, .. } = create_test_state();
        let mut client = ClientDetails::new("secure-app");
        client.client_secret = Some("s3cret".to_string());
        registry.seed(client).unwrap();

        assert!(state
            .authenticate_client("secure-app", Some("s3cret"))
            .await
            .is_ok());
        let err = state
            .authenticate_client("secure-app", Some("wrong"))
            .await
            .unwrap_err();
        assert_eq!(err.error, "invalid_client");
        let err = state.authenticate_client("secure-app", None).await.unwrap_err();
        assert_eq!(err.error, "invalid_client");
    }

    #[tokio::test]
    async fn test_public_client_authenticates_without_a_secret() {
        let TestState { state, registry, .. } = create_test_state();
        registry.seed(ClientDetails::new("public-app")).unwrap();
        assert!(state.authenticate_client("public-app", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_client_is_rejected() {
        let TestState { state, .. } = create_test_state();
        let err = state.authenticate_client("ghost", None).await.unwrap_err();
        assert_eq!(err.error, "invalid_client");
    }
}
