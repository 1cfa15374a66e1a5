use crate::models::ClientDetails;
use crate::scope::ScopeCatalog;
use std::sync::Arc;
use thiserror::Error;

pub mod cached;
pub mod registry;
pub mod remote;

/// Errors from client directory lookups.
/// An unknown client id is distinguishable from a backend failure.
#[derive(Debug, Clone, Error)]
pub enum DirectoryError {
    #[error("client not found")]
    NotFound,
    #[error("client directory request failed: {0}")]
    Backend(String),
    #[error("invalid client record: {0}")]
    Invalid(String),
    #[error("client directory configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for DirectoryError {
    fn from(err: reqwest::Error) -> Self {
        DirectoryError::Backend(err.to_string())
    }
}

/// Lookup contract for registered OAuth clients
#[async_trait::async_trait]
pub trait ClientDirectory: Send + Sync {
    async fn load_by_client_id(&self, client_id: &str) -> Result<ClientDetails, DirectoryError>;
}

/// Create the client directory selected by the configuration.
///
/// The static source reads an optional JSON seed file; the remote source
/// wraps the HTTP directory in the memoizing cache so concurrent lookups
/// of one client share a single upstream fetch.
pub fn create_directory(
    config: &crate::config::UmaConfig,
    catalog: &ScopeCatalog,
) -> Result<Arc<dyn ClientDirectory>, DirectoryError> {
    match config.clients.source {
        crate::config::ClientSource::Static => {
            let registry = match &config.clients.file {
                Some(path) if !path.is_empty() => {
                    registry::ClientRegistry::from_file(path, catalog.clone())?
                }
                _ => registry::ClientRegistry::new(catalog.clone()),
            };
            Ok(Arc::new(registry))
        }
        crate::config::ClientSource::Remote => {
            let remote = remote::RemoteDirectory::new(&config.clients)?;
            Ok(Arc::new(cached::CachedDirectory::new(
                Arc::new(remote),
                config.clients.cache.ttl,
                config.clients.cache.capacity,
            )))
        }
    }
}
