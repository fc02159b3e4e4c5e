//! Per-client registry of in-memory strategies.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::strategy::AdmissionStrategy;
use crate::error::EngineError;

/// Scopes local strategies to client keys.
///
/// Each key gets its own strategy instance, created lazily on the key's
/// first decision and kept for the life of the limiter. This struct is
/// thread-safe and can be shared across multiple tasks.
#[derive(Debug, Default)]
pub struct KeyedLimiter {
    /// Strategies indexed by client key
    strategies: DashMap<String, Arc<dyn AdmissionStrategy>>,
}

impl KeyedLimiter {
    /// Create an empty limiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the strategy for `key`, building it with `build` if absent.
    ///
    /// A failed build leaves no entry behind.
    pub fn strategy_for<F>(&self, key: &str, build: F) -> Result<Arc<dyn AdmissionStrategy>, EngineError>
    where
        F: FnOnce() -> Result<Arc<dyn AdmissionStrategy>, EngineError>,
    {
        if let Some(strategy) = self.strategies.get(key) {
            return Ok(strategy.clone());
        }

        match self.strategies.entry(key.to_string()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let strategy = build()?;
                debug!(key = %key, algorithm = strategy.name(), "Creating strategy for key");
                entry.insert(strategy.clone());
                Ok(strategy)
            }
        }
    }

    /// Decide for `key` with its own strategy, building it on first use.
    pub async fn allow_with<F>(&self, key: &str, build: F) -> Result<bool, EngineError>
    where
        F: FnOnce() -> Result<Arc<dyn AdmissionStrategy>, EngineError>,
    {
        // The map guard is released before awaiting the decision
        let strategy = self.strategy_for(key, build)?;
        let allowed = strategy.allow(key).await?;
        trace!(key = %key, allowed, "Keyed decision");
        Ok(allowed)
    }

    /// Whether a strategy exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.strategies.contains_key(key)
    }

    /// Drop the strategy for `key`, returning whether one existed.
    pub fn remove(&self, key: &str) -> bool {
        self.strategies.remove(key).is_some()
    }

    /// Clear all strategies.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.strategies.clear();
    }

    /// Get the number of active strategies.
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Whether no strategy has been created.
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
