//! Memoizing wrapper around a client directory.
//!
//! Lookups are coalesced per client id: concurrent misses for the same
//! client share a single upstream fetch and all observers receive its
//! outcome. Only successful lookups are cached, so an unknown or
//! unreachable client is retried on the next request.

use super::{ClientDirectory, DirectoryError};
use crate::models::ClientDetails;
use moka::future::Cache as MokaCache;
use std::sync::Arc;
use std::time::Duration;

pub struct CachedDirectory {
    inner: Arc<dyn ClientDirectory>,
    cache: MokaCache<String, ClientDetails>,
}

impl CachedDirectory {
    pub fn new(inner: Arc<dyn ClientDirectory>, ttl_secs: u64, capacity: u64) -> Self {
        let cache = MokaCache::builder()
            .time_to_live(Duration::from_secs(ttl_secs))
            .max_capacity(capacity)
            .build();
        Self { inner, cache }
    }

    /// Drop a cached record so the next lookup goes upstream.
    pub async fn invalidate(&self, client_id: &str) {
        self.cache.invalidate(client_id).await;
    }
}

#[async_trait::async_trait]
impl ClientDirectory for CachedDirectory {
    async fn load_by_client_id(&self, client_id: &str) -> Result<ClientDetails, DirectoryError> {
        let inner = self.inner.clone();
        let id = client_id.to_string();
        self.cache
            .try_get_with(client_id.to_string(), async move {
                inner.load_by_client_id(&id).await
            })
            .await
            .map_err(|err: Arc<DirectoryError>| (*err).clone())
    }
}
