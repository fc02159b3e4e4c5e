//! Configuration management for the throttle service.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::Result;

/// Main configuration for the throttle service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Shared store configuration
    #[serde(default)]
    pub store: StoreConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Algorithm gating the HTTP endpoint (see `Algorithm` for accepted names)
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// Path to the per-client rate limit mapping (JSON)
    #[serde(default = "default_client_limits_path")]
    pub client_limits_path: String,

    /// Window length for fixed window strategies, in milliseconds
    #[serde(default = "default_fixed_window_ms")]
    pub fixed_window_ms: u64,

    /// Deadline for a single shared store evaluation, in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            client_limits_path: default_client_limits_path(),
            fixed_window_ms: default_fixed_window_ms(),
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl RateLimitingConfig {
    /// Fixed window length as a duration.
    pub fn fixed_window(&self) -> Duration {
        Duration::from_millis(self.fixed_window_ms)
    }

    /// Store deadline as a duration.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

fn default_algorithm() -> String {
    "distributed".to_string()
}

fn default_client_limits_path() -> String {
    "config/ip_rate_config.json".to_string()
}

fn default_fixed_window_ms() -> u64 {
    1000
}

fn default_store_timeout_ms() -> u64 {
    250
}

/// Shared store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis connection URL; when absent an in-process store is used
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Prefix for per-client keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Expiry applied to per-client keys on every write, in milliseconds (0 disables)
    #[serde(default)]
    pub key_ttl_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: default_key_prefix(),
            key_ttl_ms: 0,
        }
    }
}

fn default_key_prefix() -> String {
    "client_id".to_string()
}

impl ThrottleConfig {
    /// Load configuration from an optional file, layered with `THROTTLE__*`
    /// environment variables.
    ///
    /// The file format is inferred from its extension.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path));
        }

        let config = builder
            .add_source(config::Environment::with_prefix("THROTTLE").separator("__"))
            .build()?
            .try_deserialize()?;

        Ok(config)
    }
}
