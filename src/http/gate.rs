//! Per-request admission decisions for the HTTP boundary.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::EngineError;
use crate::ratelimit::{Algorithm, ClientLimits, KeyedLimiter, StrategyFactory, StrategyParams};

/// Outcome of a gate check that completed without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// The request may proceed
    Admitted,
    /// The client's quota is exhausted
    Denied,
}

/// Resolves a client to its configured limits and decides with the selected
/// algorithm.
///
/// Distributed strategies are built per request over the shared store, since
/// they hold no state. Local strategies are kept per client in a
/// [`KeyedLimiter`].
#[derive(Debug)]
pub struct RateLimitGate {
    limits: Arc<ClientLimits>,
    factory: StrategyFactory,
    algorithm: Algorithm,
    window: Duration,
    local: KeyedLimiter,
}

impl RateLimitGate {
    /// Create a gate. Fails if a distributed algorithm is selected and
    /// `factory` has no store.
    pub fn new(
        limits: Arc<ClientLimits>,
        factory: StrategyFactory,
        algorithm: Algorithm,
        window: Duration,
    ) -> Result<Self, EngineError> {
        if algorithm.is_distributed() && !factory.has_store() {
            return Err(EngineError::InvalidParameters(format!(
                "algorithm `{}` requires a shared store",
                algorithm
            )));
        }

        Ok(Self {
            limits,
            factory,
            algorithm,
            window,
            local: KeyedLimiter::new(),
        })
    }

    /// Get the algorithm this gate decides with.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Decide for `client`.
    ///
    /// Configuration problems and store failures are returned as errors so the
    /// caller can tell them apart from a policy denial.
    pub async fn check(&self, client: &str) -> Result<GateDecision, EngineError> {
        let limit = self.limits.lookup(client)?;
        debug!(
            client = %client,
            capacity = limit.capacity,
            refill_rate = limit.refill_rate,
            "Found rate limit configuration for client"
        );

        let params = StrategyParams {
            capacity: limit.capacity,
            rate: limit.refill_rate,
            window: self.window,
        };

        let allowed = if self.algorithm.is_distributed() {
            self.factory
                .build(self.algorithm, params)?
                .allow(client)
                .await?
        } else {
            self.local
                .allow_with(client, || self.factory.build(self.algorithm, params))
                .await?
        };

        Ok(if allowed {
            GateDecision::Admitted
        } else {
            GateDecision::Denied
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn limits() -> Arc<ClientLimits> {
        let mut limits = ClientLimits::new();
        limits.insert("1.1.1.1", 2.0, 0.001);
        Arc::new(limits)
    }

    fn distributed_factory() -> StrategyFactory {
        StrategyFactory::new().with_store(Arc::new(MemoryStore::new()), Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_distributed_gate() {
        let gate = RateLimitGate::new(
            limits(),
            distributed_factory(),
            Algorithm::DistributedTokenBucket,
            Duration::from_secs(1),
        )
        .unwrap();

        assert_eq!(gate.check("1.1.1.1").await.unwrap(), GateDecision::Admitted);
        assert_eq!(gate.check("1.1.1.1").await.unwrap(), GateDecision::Admitted);
        assert_eq!(gate.check("1.1.1.1").await.unwrap(), GateDecision::Denied);
    }

    #[tokio::test]
    async fn test_local_gate_keeps_state_per_client() {
        let mut limits = ClientLimits::new();
        limits.insert("a", 1.0, 0.001);
        limits.insert("b", 1.0, 0.001);

        let gate = RateLimitGate::new(
            Arc::new(limits),
            StrategyFactory::new(),
            Algorithm::LeakyBucket,
            Duration::from_secs(1),
        )
        .unwrap();

        assert_eq!(gate.check("a").await.unwrap(), GateDecision::Admitted);
        assert_eq!(gate.check("a").await.unwrap(), GateDecision::Denied);
        assert_eq!(gate.check("b").await.unwrap(), GateDecision::Admitted);
    }

    #[tokio::test]
    async fn test_unknown_client_is_configuration_missing() {
        let gate = RateLimitGate::new(
            limits(),
            distributed_factory(),
            Algorithm::DistributedTokenBucket,
            Duration::from_secs(1),
        )
        .unwrap();

        let err = gate.check("9.9.9.9").await.unwrap_err();
        assert!(matches!(err, EngineError::ConfigurationMissing(_)));
    }

    #[test]
    fn test_distributed_gate_without_store_fails_fast() {
        let result = RateLimitGate::new(
            limits(),
            StrategyFactory::new(),
            Algorithm::DistributedTokenBucket,
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(EngineError::InvalidParameters(_))));
    }
}
