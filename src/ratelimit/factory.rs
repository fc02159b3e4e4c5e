//! Construction of admission strategies from configuration names.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::distributed::{DistributedTokenBucket, DEFAULT_KEY_PREFIX, DEFAULT_STORE_TIMEOUT};
use super::fixed_window::FixedWindow;
use super::leaky_bucket::LeakyBucket;
use super::strategy::AdmissionStrategy;
use super::token_bucket::TokenBucket;
use crate::error::EngineError;
use crate::store::SharedStoreHandle;

/// Default capacity (or window limit) when none is configured.
const DEFAULT_CAPACITY: f64 = 5.0;
/// Default refill or leak rate, per second.
const DEFAULT_RATE: f64 = 1.0;
/// Default window length for fixed windows.
const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// The supported algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Counter reset once per window
    FixedWindow,
    /// Queue drained at a constant rate
    LeakyBucket,
    /// In-process token bucket
    TokenBucket,
    /// Token bucket evaluated atomically in the shared store
    DistributedTokenBucket,
}

impl Algorithm {
    /// Canonical configuration name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::FixedWindow => "fixed",
            Algorithm::LeakyBucket => "leaky",
            Algorithm::TokenBucket => "token",
            Algorithm::DistributedTokenBucket => "distributed",
        }
    }

    /// Whether strategies of this kind keep their state in the shared store.
    pub fn is_distributed(&self) -> bool {
        matches!(self, Algorithm::DistributedTokenBucket)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "fixed" | "fixed_window" => Ok(Algorithm::FixedWindow),
            "leaky" | "leaky_bucket" => Ok(Algorithm::LeakyBucket),
            "token" | "token_bucket" => Ok(Algorithm::TokenBucket),
            "distributed" | "token_distributed" => Ok(Algorithm::DistributedTokenBucket),
            other => Err(EngineError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// Parameters used to build a strategy.
///
/// `capacity` is the bucket size (or the per-window limit for fixed windows),
/// `rate` the refill or leak rate per second, and `window` the fixed window
/// length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyParams {
    pub capacity: f64,
    pub rate: f64,
    pub window: Duration,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            rate: DEFAULT_RATE,
            window: DEFAULT_WINDOW,
        }
    }
}

/// Builds admission strategies by algorithm.
///
/// The distributed algorithm is only available when the factory was given a
/// store handle; asking for it otherwise fails at construction time.
#[derive(Debug, Clone)]
pub struct StrategyFactory {
    defaults: StrategyParams,
    store: Option<SharedStoreHandle>,
    key_prefix: String,
    store_timeout: Duration,
}

impl Default for StrategyFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyFactory {
    /// Create a factory with the built-in defaults and no shared store.
    pub fn new() -> Self {
        Self {
            defaults: StrategyParams::default(),
            store: None,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Replace the parameters used by [`StrategyFactory::create`].
    pub fn with_defaults(mut self, defaults: StrategyParams) -> Self {
        self.defaults = defaults;
        self
    }

    /// Enable distributed strategies over `store`, bounding each evaluation by
    /// `timeout`.
    pub fn with_store(mut self, store: SharedStoreHandle, timeout: Duration) -> Self {
        self.store = Some(store);
        self.store_timeout = timeout;
        self
    }

    /// Prefix for the per-client keys of distributed strategies.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Whether distributed strategies can be built.
    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Get the default parameters.
    pub fn defaults(&self) -> StrategyParams {
        self.defaults
    }

    /// Build the algorithm named `name` with the default parameters.
    pub fn create(&self, name: &str) -> Result<Arc<dyn AdmissionStrategy>, EngineError> {
        let algorithm: Algorithm = name.parse()?;
        self.build(algorithm, self.defaults)
    }

    /// Build `algorithm` with explicit parameters.
    pub fn build(
        &self,
        algorithm: Algorithm,
        params: StrategyParams,
    ) -> Result<Arc<dyn AdmissionStrategy>, EngineError> {
        let strategy: Arc<dyn AdmissionStrategy> = match algorithm {
            Algorithm::FixedWindow => {
                if !params.capacity.is_finite() {
                    return Err(EngineError::InvalidParameters(format!(
                        "fixed window limit must be finite, got {}",
                        params.capacity
                    )));
                }
                Arc::new(FixedWindow::new(params.capacity.floor() as u64, params.window)?)
            }
            Algorithm::LeakyBucket => Arc::new(LeakyBucket::new(params.capacity, params.rate)?),
            Algorithm::TokenBucket => Arc::new(TokenBucket::new(params.capacity, params.rate)?),
            Algorithm::DistributedTokenBucket => {
                let store = self.store.clone().ok_or_else(|| {
                    EngineError::InvalidParameters(
                        "distributed token bucket requires a shared store".to_string(),
                    )
                })?;
                Arc::new(
                    DistributedTokenBucket::new(store, params.capacity, params.rate)?
                        .with_key_prefix(self.key_prefix.clone())
                        .with_timeout(self.store_timeout),
                )
            }
        };

        debug!(
            algorithm = %algorithm,
            capacity = params.capacity,
            rate = params.rate,
            "Built admission strategy"
        );

        Ok(strategy)
    }
}
