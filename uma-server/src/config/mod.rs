pub use crate::config::clients::{ClientCacheConfig, ClientSource, ClientsConfig};
pub use crate::config::store::{RedisStoreConfig, StoreBackend, StoreConfig};
pub use crate::config::tokens::{TokenConfig, TtlConfig};
use config::{Config as ConfigCrate, ConfigError};
use serde::Deserialize;

pub mod clients;
pub mod store;
pub mod tokens;

/// Main configuration structure for the authorization server
#[derive(Debug, Deserialize, Clone)]
pub struct UmaConfig {
    /// The port the server will listen to (default: 7800)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Issuer URL stamped into every token this server signs
    #[serde(default = "default_issuer")]
    pub issuer: String,

    /// Token issuance configuration
    #[serde(default)]
    pub tokens: TokenConfig,

    /// Credential store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Client directory configuration
    #[serde(default)]
    pub clients: ClientsConfig,

    /// Background sweep configuration
    #[serde(default)]
    pub sweep: SweepConfig,

    /// Readiness probe configuration
    #[serde(default)]
    pub health: HealthConfig,
}

fn default_port() -> u16 {
    7800
}

fn default_issuer() -> String {
    "http://localhost:7800".to_string()
}

impl Default for UmaConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            issuer: default_issuer(),
            tokens: TokenConfig::default(),
            store: StoreConfig::default(),
            clients: ClientsConfig::default(),
            sweep: SweepConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

/// Scheduling for the expired-credential sweeps
#[derive(Debug, Deserialize, Clone)]
pub struct SweepConfig {
    /// Seconds between sweep passes (default: 60)
    #[serde(default = "default_sweep_interval")]
    pub interval: u64,

    /// Seconds to wait before the first pass (default: 10)
    #[serde(default = "default_sweep_delay")]
    pub delay: u64,
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_sweep_delay() -> u64 {
    10
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: default_sweep_interval(),
            delay: default_sweep_delay(),
        }
    }
}

/// Readiness probe options
#[derive(Debug, Deserialize, Clone)]
pub struct HealthConfig {
    /// Timeout for dependency checks in seconds (default: 1.0)
    #[serde(default = "default_health_timeout")]
    pub timeout: f64,
}

fn default_health_timeout() -> f64 {
    1.0
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            timeout: default_health_timeout(),
        }
    }
}

impl UmaConfig {
    /// Creates a new Config instance from environment variables
    pub fn new() -> Result<Self, String> {
        ConfigCrate::builder()
            .add_source(
                config::Environment::with_prefix("UMA")
                    .prefix_separator("_")
                    .separator("_")
                    .convert_case(config::Case::Snake),
            )
            .build()
            .map_err(|e: ConfigError| e.to_string())?
            .try_deserialize()
            .map_err(|e| e.to_string())
    }

    #[cfg(test)]
    pub fn for_testing() -> Self {
        Self {
            issuer: "http://localhost/test".to_string(),
            tokens: TokenConfig {
                secret: "test-signing-secret".to_string(),
                ttl: TtlConfig::default(),
            },
            ..Default::default()
        }
    }
}
