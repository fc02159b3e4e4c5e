//! Rate limiting strategies and their construction.

mod distributed;
mod factory;
mod fixed_window;
mod keyed;
mod leaky_bucket;
mod rules;
mod strategy;
mod token_bucket;

pub use distributed::{DistributedTokenBucket, DEFAULT_KEY_PREFIX, DEFAULT_STORE_TIMEOUT};
pub use factory::{Algorithm, StrategyFactory, StrategyParams};
pub use fixed_window::FixedWindow;
pub use keyed::KeyedLimiter;
pub use leaky_bucket::LeakyBucket;
pub use rules::{BucketLimit, ClientLimits};
pub use strategy::AdmissionStrategy;
pub use token_bucket::TokenBucket;

use crate::error::EngineError;

/// Check the parameters shared by the bucket algorithms.
///
/// A bucket must be able to hold at least one unit, and its rate must be a
/// positive finite number.
pub(crate) fn validate_bucket(kind: &str, capacity: f64, rate: f64) -> Result<(), EngineError> {
    if !capacity.is_finite() || capacity < 1.0 {
        return Err(EngineError::InvalidParameters(format!(
            "{} capacity must be a finite number >= 1, got {}",
            kind, capacity
        )));
    }
    if !rate.is_finite() || rate <= 0.0 {
        return Err(EngineError::InvalidParameters(format!(
            "{} rate must be a finite positive number, got {}",
            kind, rate
        )));
    }
    Ok(())
}
