use serde::Deserialize;

/// Specifies which credential store implementation to use
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StoreBackend {
    #[default]
    InMemory,
    Redis,
}

/// Configuration for the credential store
#[derive(Debug, Deserialize, Clone, Default)]
pub struct StoreConfig {
    /// Store backend: "in-memory" (default) or "redis"
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis store specific configuration
    #[serde(default)]
    pub redis: RedisStoreConfig,
}

/// Redis store configuration options
#[derive(Debug, Deserialize, Clone)]
pub struct RedisStoreConfig {
    /// Redis connection string
    #[serde(default)]
    pub url: String,

    /// Per-operation timeout in seconds (default: 5)
    #[serde(default = "default_redis_timeout")]
    pub timeout: u64,
}

fn default_redis_timeout() -> u64 {
    5
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout: default_redis_timeout(),
        }
    }
}
