use serde::Deserialize;

/// Configuration for token issuance
#[derive(Debug, Deserialize, Clone, Default)]
pub struct TokenConfig {
    /// HMAC secret used to sign issued JWTs.
    /// When empty, a random secret is generated at startup and signed
    /// values do not survive a restart.
    #[serde(default)]
    pub secret: String,

    /// Lifetimes for short-lived grant artifacts
    #[serde(default)]
    pub ttl: TtlConfig,
}

/// Lifetimes, in seconds, for artifacts that always expire
#[derive(Debug, Deserialize, Clone)]
pub struct TtlConfig {
    /// Authorization code lifetime (default: 300)
    #[serde(default = "default_code_ttl")]
    pub code: i64,

    /// Device code lifetime when the client sets none (default: 600)
    #[serde(default = "default_device_ttl")]
    pub device: i64,

    /// Permission ticket lifetime (default: 300)
    #[serde(default = "default_ticket_ttl")]
    pub ticket: i64,
}

fn default_code_ttl() -> i64 {
    300
}

fn default_device_ttl() -> i64 {
    600
}

fn default_ticket_ttl() -> i64 {
    300
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            code: default_code_ttl(),
            device: default_device_ttl(),
            ticket: default_ticket_ttl(),
        }
    }
}
