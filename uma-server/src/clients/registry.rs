//! In-process client registry backing the static directory source.
//!
//! Registration and update normalize each record so that the
//! `refresh_token` grant and the `offline_access` scope imply each
//! other. Lookups after a write therefore never observe a client that
//! can refresh but lacks the scope, or the other way around.

use super::{ClientDirectory, DirectoryError};
use crate::models::{ClientDetails, GRANT_REFRESH_TOKEN, SCOPE_OFFLINE_ACCESS};
use crate::scope::ScopeCatalog;
use log::info;
use std::collections::HashMap;
use std::sync::RwLock;

pub struct ClientRegistry {
    catalog: ScopeCatalog,
    clients: RwLock<HashMap<String, ClientDetails>>,
}

impl ClientRegistry {
    pub fn new(catalog: ScopeCatalog) -> Self {
        Self {
            catalog,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Load seed clients from a JSON file holding an array of client records.
    /// Seeded records are trusted and keep restricted scopes.
    pub fn from_file(path: &str, catalog: ScopeCatalog) -> Result<Self, DirectoryError> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            DirectoryError::Config(format!("Failed to read client seed file {}: {}", path, err))
        })?;
        let seeds: Vec<ClientDetails> = serde_json::from_str(&raw).map_err(|err| {
            DirectoryError::Config(format!("Failed to parse client seed file {}: {}", path, err))
        })?;

        let registry = Self::new(catalog);
        let count = seeds.len();
        for client in seeds {
            registry.seed(client)?;
        }
        info!("Loaded {} clients from seed file {}", count, path);
        Ok(registry)
    }

    /// Insert a trusted client record, bypassing the restricted-scope filter.
    /// Restricted scopes such as `uma_protection` can only enter the registry
    /// through this path.
    pub fn seed(&self, mut client: ClientDetails) -> Result<(), DirectoryError> {
        if client.client_id.is_empty() {
            return Err(DirectoryError::Invalid(
                "client_id must not be empty".to_string(),
            ));
        }
        ensure_refresh_consistency(&mut client);
        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        clients.insert(client.client_id.clone(), client);
        Ok(())
    }

    /// Register a new client. Restricted and reserved scopes are dropped
    /// from the requested scope set before the record is stored.
    pub fn register(&self, mut client: ClientDetails) -> Result<ClientDetails, DirectoryError> {
        if client.client_id.is_empty() {
            return Err(DirectoryError::Invalid(
                "client_id must not be empty".to_string(),
            ));
        }
        client.scope = self.catalog.strip_restricted_and_reserved(&client.scope);
        ensure_refresh_consistency(&mut client);

        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        if clients.contains_key(&client.client_id) {
            return Err(DirectoryError::Invalid(format!(
                "client {} is already registered",
                client.client_id
            )));
        }
        clients.insert(client.client_id.clone(), client.clone());
        Ok(client)
    }

    /// Replace an existing client record, applying the same scope filter
    /// and grant normalization as registration.
    pub fn update(&self, mut client: ClientDetails) -> Result<ClientDetails, DirectoryError> {
        client.scope = self.catalog.strip_restricted_and_reserved(&client.scope);
        ensure_refresh_consistency(&mut client);

        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        if !clients.contains_key(&client.client_id) {
            return Err(DirectoryError::NotFound);
        }
        clients.insert(client.client_id.clone(), client.clone());
        Ok(client)
    }

    pub fn remove(&self, client_id: &str) {
        let mut clients = self.clients.write().unwrap_or_else(|e| e.into_inner());
        clients.remove(client_id);
    }
}

/// Make the refresh grant and the offline_access scope imply each other.
fn ensure_refresh_consistency(client: &mut ClientDetails) {
    if client.grant_types.contains(GRANT_REFRESH_TOKEN) {
        client.scope.insert(SCOPE_OFFLINE_ACCESS.to_string());
    }
    if client.scope.contains(SCOPE_OFFLINE_ACCESS) {
        client.grant_types.insert(GRANT_REFRESH_TOKEN.to_string());
    }
}

#[async_trait::async_trait]
impl ClientDirectory for ClientRegistry {
    async fn load_by_client_id(&self, client_id: &str) -> Result<ClientDetails, DirectoryError> {
        let clients = self.clients.read().unwrap_or_else(|e| e.into_inner());
        clients.get(client_id).cloned().ok_or(DirectoryError::NotFound)
    }
}
