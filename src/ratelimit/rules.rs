//! Per-client rate limit configuration.
//!
//! The mapping is loaded from JSON of the form
//!
//! ```json
//! { "ip_rate_limits": { "10.0.0.1": [5, 1] } }
//! ```
//!
//! where each entry is `[capacity, refill_rate]`. Entries are validated at
//! lookup time, so one malformed entry denies only its own client.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{EngineError, Result, ThrottleError};

/// Bucket parameters for one client.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketLimit {
    /// Maximum tokens
    pub capacity: f64,
    /// Tokens added per second
    pub refill_rate: f64,
}

/// The per-client rate limit mapping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientLimits {
    /// Raw entries keyed by client identity
    #[serde(default)]
    ip_rate_limits: HashMap<String, Value>,
}

impl ClientLimits {
    /// Create an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the mapping from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading client rate limit configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Load the mapping from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            ThrottleError::Config(format!("Failed to parse client rate limits: {}", e))
        })
    }

    /// Add or replace the entry for `client`.
    pub fn insert(&mut self, client: impl Into<String>, capacity: f64, refill_rate: f64) {
        self.ip_rate_limits
            .insert(client.into(), serde_json::json!([capacity, refill_rate]));
    }

    /// Get the number of configured clients.
    pub fn len(&self) -> usize {
        self.ip_rate_limits.len()
    }

    /// Whether no client is configured.
    pub fn is_empty(&self) -> bool {
        self.ip_rate_limits.is_empty()
    }

    /// Find the bucket parameters for `client`.
    ///
    /// Absent clients yield `ConfigurationMissing`; entries that are not a
    /// pair of positive numbers yield `ConfigurationInvalid`.
    pub fn lookup(&self, client: &str) -> std::result::Result<BucketLimit, EngineError> {
        let entry = self.ip_rate_limits.get(client).ok_or_else(|| {
            warn!(client = %client, "No rate limit configuration for client");
            EngineError::ConfigurationMissing(client.to_string())
        })?;

        Self::parse_entry(entry).map_err(|reason| {
            warn!(client = %client, reason = %reason, "Invalid rate limit configuration for client");
            EngineError::ConfigurationInvalid {
                client: client.to_string(),
                reason,
            }
        })
    }

    fn parse_entry(entry: &Value) -> std::result::Result<BucketLimit, String> {
        let values = entry
            .as_array()
            .ok_or_else(|| format!("expected [capacity, refill_rate], got {}", entry))?;

        if values.len() != 2 {
            return Err(format!("expected 2 elements, got {}", values.len()));
        }

        let number = |v: &Value, name: &str| {
            v.as_f64()
                .filter(|n| n.is_finite() && *n > 0.0)
                .ok_or_else(|| format!("{} must be a positive number, got {}", name, v))
        };

        let capacity = number(&values[0], "capacity")?;
        let refill_rate = number(&values[1], "refill_rate")?;

        if capacity < 1.0 {
            return Err(format!("capacity must be at least 1, got {}", capacity));
        }

        Ok(BucketLimit {
            capacity,
            refill_rate,
        })
    }
}
