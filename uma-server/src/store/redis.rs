use super::{CredentialStore, StoreError};
use crate::models::{
    AccessToken, AuthenticationHolder, AuthorizationCode, DeviceCode, PermissionTicket,
    RefreshToken, ResourceSet,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::error;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

// Key layout. Entity records are JSON strings; the extra keys are lookup
// indexes maintained alongside the record they point at.
//   authcode:{code}                  -> AuthorizationCode
//   at:value:{value}                 -> AccessToken
//   at:id:{id}                      -> access-token value
//   at:by-rt:{refresh_id}           -> set of access-token values
//   rt:value:{value}                 -> RefreshToken
//   holder:{id}                      -> AuthenticationHolder
//   device:code:{client_id}:{code}   -> DeviceCode
//   device:user:{user_code}          -> device record key
//   rs:set:{id}                      -> ResourceSet
//   rs:owner:{owner}                 -> set of resource-set ids
//   ticket:{ticket}                  -> PermissionTicket
const CODE_PREFIX: &str = "authcode:";
const ACCESS_VALUE_PREFIX: &str = "at:value:";
const ACCESS_ID_PREFIX: &str = "at:id:";
const ACCESS_BY_REFRESH_PREFIX: &str = "at:by-rt:";
const REFRESH_VALUE_PREFIX: &str = "rt:value:";
const HOLDER_PREFIX: &str = "holder:";
const DEVICE_CODE_PREFIX: &str = "device:code:";
const DEVICE_USER_PREFIX: &str = "device:user:";
const RESOURCE_SET_PREFIX: &str = "rs:set:";
const RESOURCE_OWNER_PREFIX: &str = "rs:owner:";
const TICKET_PREFIX: &str = "ticket:";

fn device_key(client_id: &str, device_code: &str) -> String {
    format!("{DEVICE_CODE_PREFIX}{client_id}:{device_code}")
}

/// Redis-backed credential store for shared deployments.
///
/// Consume operations use `GETDEL`, so the find-and-delete is atomic per
/// key; the device-grant key embeds the owning client id, which makes the
/// client-bound consume atomic as well. Sweep queries walk the keyspace
/// with `SCAN` and filter locally; they run on the maintenance path only.
#[derive(Clone)]
pub struct RedisStore {
    _client: Client,
    conn_manager: ConnectionManager,
    op_timeout: Duration,
}

impl RedisStore {
    /// Initialize a new Redis store instance
    pub async fn new(redis_url: &str, operation_timeout_secs: u64) -> Result<Self, String> {
        let client = match Client::open(redis_url) {
            Ok(client) => client,
            Err(err) => {
                return Err(format!("Failed to connect to Redis: {}", err));
            }
        };

        let conn_manager = match ConnectionManager::new(client.clone()).await {
            Ok(manager) => manager,
            Err(err) => {
                return Err(format!(
                    "Failed to create Redis connection manager: {}",
                    err
                ));
            }
        };

        // Test the connection to ensure it's working
        let mut conn = conn_manager.clone();
        if let Err(err) = redis::cmd("PING").query_async::<String>(&mut conn).await {
            return Err(format!("Failed to ping Redis: {}", err));
        }

        Ok(Self {
            conn_manager,
            op_timeout: Duration::from_secs(operation_timeout_secs),
            _client: client,
        })
    }

    /// Run one Redis call under the configured timeout.
    /// A timeout maps to `StoreError::Timeout`, never to "not found".
    async fn bounded<T>(
        &self,
        fut: impl Future<Output = redis::RedisResult<T>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                error!("Redis error: {}", err);
                Err(StoreError::Redis(err.to_string()))
            }
            Err(_) => Err(StoreError::Timeout(format!(
                "redis call exceeded {}ms",
                self.op_timeout.as_millis()
            ))),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let mut conn = self.conn_manager.clone();
        let raw: Option<String> = self.bounded(conn.get(key)).await?;
        raw.map(|r| parse(&r)).transpose()
    }

    async fn set_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(value)?;
        let mut conn = self.conn_manager.clone();
        self.bounded(conn.set::<_, _, ()>(key, serialized)).await
    }

    async fn take_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let mut conn = self.conn_manager.clone();
        let mut cmd = redis::cmd("GETDEL");
        cmd.arg(key);
        let raw: Option<String> = self.bounded(cmd.query_async(&mut conn)).await?;
        raw.map(|r| parse(&r)).transpose()
    }

    async fn delete_key(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        self.bounded(conn.del::<_, ()>(key)).await
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn_manager.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let mut cmd = redis::cmd("SCAN");
            cmd.arg(cursor).arg("MATCH").arg(pattern).arg("COUNT").arg(100);
            let (next, batch): (u64, Vec<String>) =
                self.bounded(cmd.query_async(&mut conn)).await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }

    async fn load_many<T: DeserializeOwned>(&self, keys: &[String]) -> Result<Vec<T>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn_manager.clone();
        let raw: Vec<Option<String>> = self.bounded(conn.mget(keys)).await?;
        // Keys can disappear between the scan and the load; skip the gaps
        raw.into_iter().flatten().map(|r| parse(&r)).collect()
    }

    async fn load_by_pattern<T: DeserializeOwned>(
        &self,
        pattern: &str,
    ) -> Result<Vec<T>, StoreError> {
        let keys = self.scan_keys(pattern).await?;
        self.load_many(&keys).await
    }
}

fn parse<T: DeserializeOwned>(raw: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Deserialization(e.to_string()))
}

#[async_trait]
impl CredentialStore for RedisStore {
    async fn save_code(&self, code: &AuthorizationCode) -> Result<(), StoreError> {
        self.set_json(&format!("{CODE_PREFIX}{}", code.code), code)
            .await
    }

    async fn get_code(&self, code: &str) -> Result<Option<AuthorizationCode>, StoreError> {
        self.get_json(&format!("{CODE_PREFIX}{code}")).await
    }

    async fn consume_code(&self, code: &str) -> Result<Option<AuthorizationCode>, StoreError> {
        self.take_json(&format!("{CODE_PREFIX}{code}")).await
    }

    async fn delete_code(&self, code: &str) -> Result<(), StoreError> {
        self.delete_key(&format!("{CODE_PREFIX}{code}")).await
    }

    async fn expired_codes(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<AuthorizationCode>, StoreError> {
        let all: Vec<AuthorizationCode> =
            self.load_by_pattern(&format!("{CODE_PREFIX}*")).await?;
        Ok(all.into_iter().filter(|c| c.is_expired(as_of)).collect())
    }

    async fn save_access_token(&self, token: &AccessToken) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(token)?;
        let mut conn = self.conn_manager.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(format!("{ACCESS_VALUE_PREFIX}{}", token.value), serialized)
            .ignore()
            .set(format!("{ACCESS_ID_PREFIX}{}", token.id), &token.value)
            .ignore();
        if let Some(refresh_id) = &token.refresh_token_id {
            pipe.sadd(
                format!("{ACCESS_BY_REFRESH_PREFIX}{refresh_id}"),
                &token.value,
            )
            .ignore();
        }
        self.bounded(pipe.query_async::<()>(&mut conn)).await
    }

    async fn get_access_token_by_value(
        &self,
        value: &str,
    ) -> Result<Option<AccessToken>, StoreError> {
        self.get_json(&format!("{ACCESS_VALUE_PREFIX}{value}")).await
    }

    async fn get_access_token_by_id(&self, id: &str) -> Result<Option<AccessToken>, StoreError> {
        let mut conn = self.conn_manager.clone();
        let value: Option<String> = self
            .bounded(conn.get(format!("{ACCESS_ID_PREFIX}{id}")))
            .await?;
        match value {
            Some(value) => self.get_access_token_by_value(&value).await,
            None => Ok(None),
        }
    }

    async fn delete_access_token(&self, value: &str) -> Result<(), StoreError> {
        let Some(token) = self.get_access_token_by_value(value).await? else {
            return Ok(());
        };
        let mut conn = self.conn_manager.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(format!("{ACCESS_VALUE_PREFIX}{value}"))
            .ignore()
            .del(format!("{ACCESS_ID_PREFIX}{}", token.id))
            .ignore();
        if let Some(refresh_id) = &token.refresh_token_id {
            pipe.srem(format!("{ACCESS_BY_REFRESH_PREFIX}{refresh_id}"), value)
                .ignore();
        }
        self.bounded(pipe.query_async::<()>(&mut conn)).await
    }

    async fn get_access_tokens_by_refresh_token(
        &self,
        refresh_token_id: &str,
    ) -> Result<Vec<AccessToken>, StoreError> {
        let mut conn = self.conn_manager.clone();
        let values: Vec<String> = self
            .bounded(conn.smembers(format!("{ACCESS_BY_REFRESH_PREFIX}{refresh_token_id}")))
            .await?;
        let keys: Vec<String> = values
            .iter()
            .map(|v| format!("{ACCESS_VALUE_PREFIX}{v}"))
            .collect();
        self.load_many(&keys).await
    }

    async fn expired_access_tokens(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<AccessToken>, StoreError> {
        let all: Vec<AccessToken> = self
            .load_by_pattern(&format!("{ACCESS_VALUE_PREFIX}*"))
            .await?;
        Ok(all.into_iter().filter(|t| t.is_expired(as_of)).collect())
    }

    async fn duplicate_access_tokens(&self) -> Result<Vec<AccessToken>, StoreError> {
        let all: Vec<AccessToken> = self
            .load_by_pattern(&format!("{ACCESS_VALUE_PREFIX}*"))
            .await?;
        let mut by_id: HashMap<String, Vec<AccessToken>> = HashMap::new();
        for token in all {
            by_id.entry(token.id.clone()).or_default().push(token);
        }
        let mut extras = Vec::new();
        for (_, mut group) in by_id {
            if group.len() > 1 {
                group.sort_by_key(|t| std::cmp::Reverse(t.issued_at));
                extras.extend(group.into_iter().skip(1));
            }
        }
        Ok(extras)
    }

    async fn save_refresh_token(&self, token: &RefreshToken) -> Result<(), StoreError> {
        self.set_json(&format!("{REFRESH_VALUE_PREFIX}{}", token.value), token)
            .await
    }

    async fn get_refresh_token_by_value(
        &self,
        value: &str,
    ) -> Result<Option<RefreshToken>, StoreError> {
        self.get_json(&format!("{REFRESH_VALUE_PREFIX}{value}")).await
    }

    async fn consume_refresh_token(
        &self,
        value: &str,
    ) -> Result<Option<RefreshToken>, StoreError> {
        self.take_json(&format!("{REFRESH_VALUE_PREFIX}{value}")).await
    }

    async fn delete_refresh_token(&self, value: &str) -> Result<(), StoreError> {
        let Some(token) = self.get_refresh_token_by_value(value).await? else {
            return Ok(());
        };
        let mut conn = self.conn_manager.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(format!("{REFRESH_VALUE_PREFIX}{value}"))
            .ignore()
            .del(format!("{ACCESS_BY_REFRESH_PREFIX}{}", token.id))
            .ignore();
        self.bounded(pipe.query_async::<()>(&mut conn)).await
    }

    async fn expired_refresh_tokens(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<RefreshToken>, StoreError> {
        let all: Vec<RefreshToken> = self
            .load_by_pattern(&format!("{REFRESH_VALUE_PREFIX}*"))
            .await?;
        Ok(all.into_iter().filter(|t| t.is_expired(as_of)).collect())
    }

    async fn save_holder(&self, holder: &AuthenticationHolder) -> Result<(), StoreError> {
        self.set_json(&format!("{HOLDER_PREFIX}{}", holder.id), holder)
            .await
    }

    async fn get_holder(&self, id: &str) -> Result<Option<AuthenticationHolder>, StoreError> {
        self.get_json(&format!("{HOLDER_PREFIX}{id}")).await
    }

    async fn delete_holder(&self, id: &str) -> Result<(), StoreError> {
        self.delete_key(&format!("{HOLDER_PREFIX}{id}")).await
    }

    async fn orphaned_holders(&self) -> Result<Vec<String>, StoreError> {
        let holder_keys = self.scan_keys(&format!("{HOLDER_PREFIX}*")).await?;
        let holder_ids: Vec<String> = holder_keys
            .iter()
            .filter_map(|k| k.strip_prefix(HOLDER_PREFIX))
            .map(str::to_string)
            .collect();
        if holder_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut referenced: std::collections::HashSet<String> = std::collections::HashSet::new();
        let codes: Vec<AuthorizationCode> =
            self.load_by_pattern(&format!("{CODE_PREFIX}*")).await?;
        referenced.extend(codes.into_iter().map(|c| c.auth_holder_id));
        let access: Vec<AccessToken> = self
            .load_by_pattern(&format!("{ACCESS_VALUE_PREFIX}*"))
            .await?;
        referenced.extend(access.into_iter().map(|t| t.auth_holder_id));
        let refresh: Vec<RefreshToken> = self
            .load_by_pattern(&format!("{REFRESH_VALUE_PREFIX}*"))
            .await?;
        referenced.extend(refresh.into_iter().map(|t| t.auth_holder_id));
        let devices: Vec<DeviceCode> = self
            .load_by_pattern(&format!("{DEVICE_CODE_PREFIX}*"))
            .await?;
        referenced.extend(devices.into_iter().filter_map(|d| d.auth_holder_id));

        Ok(holder_ids
            .into_iter()
            .filter(|id| !referenced.contains(id))
            .collect())
    }

    async fn save_device_code(&self, device: &DeviceCode) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(device)?;
        let record_key = device_key(&device.client_id, &device.device_code);
        let mut conn = self.conn_manager.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(&record_key, serialized)
            .ignore()
            .set(format!("{DEVICE_USER_PREFIX}{}", device.user_code), &record_key)
            .ignore();
        self.bounded(pipe.query_async::<()>(&mut conn)).await
    }

    async fn get_device_code(
        &self,
        device_code: &str,
        client_id: &str,
    ) -> Result<Option<DeviceCode>, StoreError> {
        self.get_json(&device_key(client_id, device_code)).await
    }

    async fn get_device_code_by_user_code(
        &self,
        user_code: &str,
    ) -> Result<Option<DeviceCode>, StoreError> {
        let mut conn = self.conn_manager.clone();
        let record_key: Option<String> = self
            .bounded(conn.get(format!("{DEVICE_USER_PREFIX}{user_code}")))
            .await?;
        match record_key {
            Some(key) => self.get_json(&key).await,
            None => Ok(None),
        }
    }

    async fn consume_device_code(
        &self,
        device_code: &str,
        client_id: &str,
    ) -> Result<Option<DeviceCode>, StoreError> {
        let taken: Option<DeviceCode> =
            self.take_json(&device_key(client_id, device_code)).await?;
        if let Some(device) = &taken {
            self.delete_key(&format!("{DEVICE_USER_PREFIX}{}", device.user_code))
                .await?;
        }
        Ok(taken)
    }

    async fn delete_device_code(
        &self,
        device_code: &str,
        client_id: &str,
    ) -> Result<(), StoreError> {
        let Some(device) = self.get_device_code(device_code, client_id).await? else {
            return Ok(());
        };
        let mut conn = self.conn_manager.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(device_key(client_id, device_code))
            .ignore()
            .del(format!("{DEVICE_USER_PREFIX}{}", device.user_code))
            .ignore();
        self.bounded(pipe.query_async::<()>(&mut conn)).await
    }

    async fn expired_device_codes(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<DeviceCode>, StoreError> {
        let all: Vec<DeviceCode> = self
            .load_by_pattern(&format!("{DEVICE_CODE_PREFIX}*"))
            .await?;
        Ok(all.into_iter().filter(|d| d.is_expired(as_of)).collect())
    }

    async fn save_resource_set(&self, resource_set: &ResourceSet) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(resource_set)?;
        let mut conn = self.conn_manager.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(format!("{RESOURCE_SET_PREFIX}{}", resource_set.id), serialized)
            .ignore()
            .sadd(
                format!("{RESOURCE_OWNER_PREFIX}{}", resource_set.owner),
                &resource_set.id,
            )
            .ignore();
        self.bounded(pipe.query_async::<()>(&mut conn)).await
    }

    async fn get_resource_set(&self, id: &str) -> Result<Option<ResourceSet>, StoreError> {
        self.get_json(&format!("{RESOURCE_SET_PREFIX}{id}")).await
    }

    async fn get_resource_sets_for_owner(
        &self,
        owner: &str,
    ) -> Result<Vec<ResourceSet>, StoreError> {
        let mut conn = self.conn_manager.clone();
        let ids: Vec<String> = self
            .bounded(conn.smembers(format!("{RESOURCE_OWNER_PREFIX}{owner}")))
            .await?;
        let keys: Vec<String> = ids
            .iter()
            .map(|id| format!("{RESOURCE_SET_PREFIX}{id}"))
            .collect();
        self.load_many(&keys).await
    }

    async fn delete_resource_set(&self, id: &str) -> Result<(), StoreError> {
        let Some(resource_set) = self.get_resource_set(id).await? else {
            return Ok(());
        };
        let mut conn = self.conn_manager.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(format!("{RESOURCE_SET_PREFIX}{id}"))
            .ignore()
            .srem(format!("{RESOURCE_OWNER_PREFIX}{}", resource_set.owner), id)
            .ignore();
        self.bounded(pipe.query_async::<()>(&mut conn)).await
    }

    async fn save_ticket(&self, ticket: &PermissionTicket) -> Result<(), StoreError> {
        self.set_json(&format!("{TICKET_PREFIX}{}", ticket.ticket), ticket)
            .await
    }

    async fn get_ticket(&self, ticket: &str) -> Result<Option<PermissionTicket>, StoreError> {
        self.get_json(&format!("{TICKET_PREFIX}{ticket}")).await
    }

    async fn consume_ticket(
        &self,
        ticket: &str,
    ) -> Result<Option<PermissionTicket>, StoreError> {
        self.take_json(&format!("{TICKET_PREFIX}{ticket}")).await
    }

    async fn delete_ticket(&self, ticket: &str) -> Result<(), StoreError> {
        self.delete_key(&format!("{TICKET_PREFIX}{ticket}")).await
    }

    async fn expired_tickets(
        &self,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<PermissionTicket>, StoreError> {
        let all: Vec<PermissionTicket> =
            self.load_by_pattern(&format!("{TICKET_PREFIX}*")).await?;
        Ok(all.into_iter().filter(|t| t.is_expired(as_of)).collect())
    }

    async fn health_check(&self) -> Result<(), String> {
        let mut conn = self.conn_manager.clone();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => Ok(()),
            Err(err) => Err(format!("Redis health check failed: {}", err)),
        }
    }
}
