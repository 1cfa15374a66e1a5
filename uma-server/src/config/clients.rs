use serde::Deserialize;

/// Specifies where client records come from
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ClientSource {
    /// In-process registry, optionally seeded from a JSON file
    #[default]
    Static,
    /// External HTTP registry, fronted by the lookup cache
    Remote,
}

/// Configuration for the client directory
#[derive(Debug, Deserialize, Clone)]
pub struct ClientsConfig {
    /// Client source: "static" (default) or "remote"
    #[serde(default)]
    pub source: ClientSource,

    /// Path to a JSON seed file for the static source
    #[serde(default)]
    pub file: Option<String>,

    /// Base URL of the remote client registry
    #[serde(default)]
    pub url: String,

    /// Bearer token sent to the remote registry
    #[serde(default)]
    pub token: Option<String>,

    /// Remote request timeout in seconds (default: 5)
    #[serde(default = "default_clients_timeout")]
    pub timeout: u64,

    /// Lookup cache configuration for the remote source
    #[serde(default)]
    pub cache: ClientCacheConfig,
}

fn default_clients_timeout() -> u64 {
    5
}

impl Default for ClientsConfig {
    fn default() -> Self {
        Self {
            source: ClientSource::Static,
            file: None,
            url: String::new(),
            token: None,
            timeout: default_clients_timeout(),
            cache: ClientCacheConfig::default(),
        }
    }
}

/// Client lookup cache options
#[derive(Debug, Deserialize, Clone)]
pub struct ClientCacheConfig {
    /// Cached record TTL in seconds (default: 60)
    #[serde(default = "default_cache_ttl")]
    pub ttl: u64,

    /// Maximum number of cached records (default: 10000)
    #[serde(default = "default_cache_capacity")]
    pub capacity: u64,
}

fn default_cache_ttl() -> u64 {
    60
}

fn default_cache_capacity() -> u64 {
    10_000
}

impl Default for ClientCacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_cache_ttl(),
            capacity: default_cache_capacity(),
        }
    }
}
