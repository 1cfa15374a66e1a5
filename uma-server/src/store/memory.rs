use super::{CredentialStore, StoreError};
use crate::models::{
    AccessToken, AuthenticationHolder, AuthorizationCode, DeviceCode, PermissionTicket,
    RefreshToken, ResourceSet,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// In-process credential store backed by locked hash maps.
///
/// Consume operations remove under the table's write lock, which makes the
/// find-and-delete per key atomic. Suitable for tests and single-instance
/// deployments; shared deployments use the Redis store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    codes: RwLock<HashMap<String, AuthorizationCode>>,
    access_tokens: RwLock<HashMap<String, AccessToken>>,
    refresh_tokens: RwLock<HashMap<String, RefreshToken>>,
    holders: RwLock<HashMap<String, AuthenticationHolder>>,
    device_codes: RwLock<HashMap<String, DeviceCode>>,
    resource_sets: RwLock<HashMap<String, ResourceSet>>,
    tickets: RwLock<HashMap<String, PermissionTicket>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryStore {
    async fn save_code(&self, code: &AuthorizationCode) -> Result<(), StoreError> {
        self.codes
            .write()
            .await
            .insert(code.code.clone(), code.clone());
        Ok(())
    }

    async fn get_code(&self, code: &str) -> Result<Option<AuthorizationCode>, StoreError> {
        Ok(self.codes.read().await.get(code).cloned())
    }

    async fn consume_code(&self, code: &str) -> Result<Option<AuthorizationCode>, StoreError> {
        Ok(self.codes.write().await.remove(code))
    }

    async fn delete_code(&self, code: &str) -> Result<(), StoreError> {
        self.codes.write().await.remove(code);
        Ok(())
    }

    async fn expired_codes(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<AuthorizationCode>, StoreError> {
        Ok(self
            .codes
            .read()
            .await
            .values()
            .filter(|c| c.is_expired(as_of))
            .cloned()
            .collect())
    }

    async fn save_access_token(&self, token: &AccessToken) -> Result<(), StoreError> {
        self.access_tokens
            .write()
            .await
            .insert(token.value.clone(), token.clone());
        Ok(())
    }

    async fn get_access_token_by_value(
        &self,
        value: &str,
    ) -> Result<Option<AccessToken>, StoreError> {
        Ok(self.access_tokens.read().await.get(value).cloned())
    }

    async fn get_access_token_by_id(&self, id: &str) -> Result<Option<AccessToken>, StoreError> {
        Ok(self
            .access_tokens
            .read()
            .await
            .values()
            .find(|t| t.id == id)
            .cloned())
    }

    async fn delete_access_token(&self, value: &str) -> Result<(), StoreError> {
        self.access_tokens.write().await.remove(value);
        Ok(())
    }

    async fn get_access_tokens_by_refresh_token(
        &self,
        refresh_token_id: &str,
    ) -> Result<Vec<AccessToken>, StoreError> {
        Ok(self
            .access_tokens
            .read()
            .await
            .values()
            .filter(|t| t.refresh_token_id.as_deref() == Some(refresh_token_id))
            .cloned()
            .collect())
    }

    async fn expired_access_tokens(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<AccessToken>, StoreError> {
        Ok(self
            .access_tokens
            .read()
            .await
            .values()
            .filter(|t| t.is_expired(as_of))
            .cloned()
            .collect())
    }

    async fn duplicate_access_tokens(&self) -> Result<Vec<AccessToken>, StoreError> {
        let tokens = self.access_tokens.read().await;
        let mut by_id: HashMap<&str, Vec<&AccessToken>> = HashMap::new();
        for token in tokens.values() {
            by_id.entry(&token.id).or_default().push(token);
        }
        let mut extras = Vec::new();
        for (_, mut group) in by_id {
            if group.len() > 1 {
                // Keep the most recently issued copy, report the rest
                group.sort_by_key(|t| std::cmp::Reverse(t.issued_at));
                extras.extend(group.into_iter().skip(1).cloned());
            }
        }
        Ok(extras)
    }

    async fn save_refresh_token(&self, token: &RefreshToken) -> Result<(), StoreError> {
        self.refresh_tokens
            .write()
            .await
            .insert(token.value.clone(), token.clone());
        Ok(())
    }

    async fn get_refresh_token_by_value(
        &self,
        value: &str,
    ) -> Result<Option<RefreshToken>, StoreError> {
        Ok(self.refresh_tokens.read().await.get(value).cloned())
    }

    async fn consume_refresh_token(
        &self,
        value: &str,
    ) -> Result<Option<RefreshToken>, StoreError> {
        Ok(self.refresh_tokens.write().await.remove(value))
    }

    async fn delete_refresh_token(&self, value: &str) -> Result<(), StoreError> {
        self.refresh_tokens.write().await.remove(value);
        Ok(())
    }

    async fn expired_refresh_tokens(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<RefreshToken>, StoreError> {
        Ok(self
            .refresh_tokens
            .read()
            .await
            .values()
            .filter(|t| t.is_expired(as_of))
            .cloned()
            .collect())
    }

    async fn save_holder(&self, holder: &AuthenticationHolder) -> Result<(), StoreError> {
        self.holders
            .write()
            .await
            .insert(holder.id.clone(), holder.clone());
        Ok(())
    }

    async fn get_holder(&self, id: &str) -> Result<Option<AuthenticationHolder>, StoreError> {
        Ok(self.holders.read().await.get(id).cloned())
    }

    async fn delete_holder(&self, id: &str) -> Result<(), StoreError> {
        self.holders.write().await.remove(id);
        Ok(())
    }

    async fn orphaned_holders(&self) -> Result<Vec<String>, StoreError> {
        let mut referenced: HashSet<String> = HashSet::new();
        referenced.extend(
            self.codes
                .read()
                .await
                .values()
                .map(|c| c.auth_holder_id.clone()),
        );
        referenced.extend(
            self.access_tokens
                .read()
                .await
                .values()
                .map(|t| t.auth_holder_id.clone()),
        );
        referenced.extend(
            self.refresh_tokens
                .read()
                .await
                .values()
                .map(|t| t.auth_holder_id.clone()),
        );
        referenced.extend(
            self.device_codes
                .read()
                .await
                .values()
                .filter_map(|d| d.auth_holder_id.clone()),
        );
        Ok(self
            .holders
            .read()
            .await
            .keys()
            .filter(|id| !referenced.contains(*id))
            .cloned()
            .collect())
    }

    async fn save_device_code(&self, device: &DeviceCode) -> Result<(), StoreError> {
        self.device_codes
            .write()
            .await
            .insert(device.device_code.clone(), device.clone());
        Ok(())
    }

    async fn get_device_code(
        &self,
        device_code: &str,
        client_id: &str,
    ) -> Result<Option<DeviceCode>, StoreError> {
        Ok(self
            .device_codes
            .read()
            .await
            .get(device_code)
            .filter(|d| d.client_id == client_id)
            .cloned())
    }

    async fn get_device_code_by_user_code(
        &self,
        user_code: &str,
    ) -> Result<Option<DeviceCode>, StoreError> {
        Ok(self
            .device_codes
            .read()
            .await
            .values()
            .find(|d| d.user_code == user_code)
            .cloned())
    }

    async fn consume_device_code(
        &self,
        device_code: &str,
        client_id: &str,
    ) -> Result<Option<DeviceCode>, StoreError> {
        let mut devices = self.device_codes.write().await;
        match devices.get(device_code) {
            Some(found) if found.client_id == client_id => Ok(devices.remove(device_code)),
            _ => Ok(None),
        }
    }

    async fn delete_device_code(
        &self,
        device_code: &str,
        client_id: &str,
    ) -> Result<(), StoreError> {
        let mut devices = self.device_codes.write().await;
        if devices
            .get(device_code)
            .is_some_and(|d| d.client_id == client_id)
        {
            devices.remove(device_code);
        }
        Ok(())
    }

    async fn expired_device_codes(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<DeviceCode>, StoreError> {
        Ok(self
            .device_codes
            .read()
            .await
            .values()
            .filter(|d| d.is_expired(as_of))
            .cloned()
            .collect())
    }

    async fn save_resource_set(&self, resource_set: &ResourceSet) -> Result<(), StoreError> {
        self.resource_sets
            .write()
            .await
            .insert(resource_set.id.clone(), resource_set.clone());
        Ok(())
    }

    async fn get_resource_set(&self, id: &str) -> Result<Option<ResourceSet>, StoreError> {
        Ok(self.resource_sets.read().await.get(id).cloned())
    }

    async fn get_resource_sets_for_owner(
        &self,
        owner: &str,
    ) -> Result<Vec<ResourceSet>, StoreError> {
        Ok(self
            .resource_sets
            .read()
            .await
            .values()
            .filter(|rs| rs.owner == owner)
            .cloned()
            .collect())
    }

    async fn delete_resource_set(&self, id: &str) -> Result<(), StoreError> {
        self.resource_sets.write().await.remove(id);
        Ok(())
    }

    async fn save_ticket(&self, ticket: &PermissionTicket) -> Result<(), StoreError> {
        self.tickets
            .write()
            .await
            .insert(ticket.ticket.clone(), ticket.clone());
        Ok(())
    }

    async fn get_ticket(&self, ticket: &str) -> Result<Option<PermissionTicket>, StoreError> {
        Ok(self.tickets.read().await.get(ticket).cloned())
    }

    async fn consume_ticket(
        &self,
        ticket: &str,
    ) -> Result<Option<PermissionTicket>, StoreError> {
        Ok(self.tickets.write().await.remove(ticket))
    }

    async fn delete_ticket(&self, ticket: &str) -> Result<(), StoreError> {
        self.tickets.write().await.remove(ticket);
        Ok(())
    }

    async fn expired_tickets(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<PermissionTicket>, StoreError> {
        Ok(self
            .tickets
            .read()
            .await
            .values()
            .filter(|t| t.is_expired(as_of))
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> Result<(), String> {
        Ok(())
    }
}
