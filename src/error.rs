//! Error types for the throttling engine and service.

use std::time::Duration;
use thiserror::Error;

/// Failures of the shared store boundary.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The Redis connection or command failed.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The atomic evaluation returned something other than the expected reply.
    #[error("malformed reply from store: {0}")]
    MalformedReply(String),

    /// The evaluation did not complete before its deadline.
    #[error("store evaluation timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors surfaced by admission decisions and strategy construction.
///
/// A request denied by policy is not an error: strategies report it as
/// `Ok(false)`.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The factory was asked for an algorithm it does not know.
    #[error("unsupported algorithm `{0}`")]
    UnsupportedAlgorithm(String),

    /// No rate limit entry exists for the client.
    #[error("no rate limit configured for client `{0}`")]
    ConfigurationMissing(String),

    /// The client's rate limit entry has the wrong shape.
    #[error("invalid rate limit configuration for client `{client}`: {reason}")]
    ConfigurationInvalid { client: String, reason: String },

    /// The shared store could not produce a decision.
    #[error("shared store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// Strategy parameters are out of range or a required handle is absent.
    #[error("invalid strategy parameters: {0}")]
    InvalidParameters(String),
}

impl EngineError {
    /// Whether the error comes from configuration rather than the engine itself.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            EngineError::ConfigurationMissing(_) | EngineError::ConfigurationInvalid { .. }
        )
    }
}

/// Main error type for service-level operations.
#[derive(Error, Debug)]
pub enum ThrottleError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rate limiting engine errors
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Shared store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for ThrottleError {
    fn from(err: config::ConfigError) -> Self {
        ThrottleError::Config(err.to_string())
    }
}

/// Result type alias for service-level operations.
pub type Result<T> = std::result::Result<T, ThrottleError>;
