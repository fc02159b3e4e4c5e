//! Distributed token bucket backed by a shared store.
//!
//! The bucket holds configuration only. Token state lives in the store per
//! client key, and the refill-and-consume step runs there atomically, so
//! callers in any number of processes cannot race on read-modify-write.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, trace};

use super::strategy::AdmissionStrategy;
use super::validate_bucket;
use crate::error::{EngineError, StoreError};
use crate::store::{BucketKeys, SharedStoreHandle, StoreEvaluation};

/// Default prefix for per-client store keys.
pub const DEFAULT_KEY_PREFIX: &str = "client_id";
/// Default deadline for a single store evaluation.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(250);

/// A token bucket whose state is shared through a [`SharedStore`].
///
/// Holds no lock of its own; it is safe for any number of concurrent callers.
///
/// [`SharedStore`]: crate::store::SharedStore
#[derive(Debug, Clone)]
pub struct DistributedTokenBucket {
    /// The process-wide store handle.
    store: SharedStoreHandle,
    /// Maximum tokens per client.
    capacity: f64,
    /// Tokens added per second.
    refill_rate: f64,
    /// Prefix of the per-client keys.
    key_prefix: String,
    /// Deadline applied by `allow`.
    timeout: Duration,
}

impl DistributedTokenBucket {
    /// Create a distributed bucket over `store`.
    pub fn new(
        store: SharedStoreHandle,
        capacity: f64,
        refill_rate: f64,
    ) -> Result<Self, EngineError> {
        validate_bucket("distributed token bucket", capacity, refill_rate)?;
        Ok(Self {
            store,
            capacity,
            refill_rate,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            timeout: DEFAULT_STORE_TIMEOUT,
        })
    }

    /// Use a different prefix for the per-client keys.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Use a different default deadline for store evaluations.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Keys addressing `client`'s state in the store.
    pub fn keys_for(&self, client: &str) -> BucketKeys {
        BucketKeys::for_client(&self.key_prefix, client)
    }

    /// Run one atomic evaluation for `client`, bounded by `deadline`.
    ///
    /// Returns the full store reply, including the elapsed time and the
    /// tokens added by the refill.
    pub async fn evaluate(
        &self,
        client: &str,
        deadline: Duration,
    ) -> Result<StoreEvaluation, EngineError> {
        let keys = self.keys_for(client);
        let now_ms = chrono::Utc::now().timestamp_millis();

        let evaluation = tokio::time::timeout(
            deadline,
            self.store
                .evaluate(&keys, now_ms, self.refill_rate, self.capacity),
        )
        .await
        .map_err(|_| StoreError::Timeout(deadline))
        .and_then(|result| result)
        .map_err(|e| {
            error!(client = %client, error = %e, "Distributed token bucket evaluation failed");
            EngineError::StoreUnavailable(e)
        })?;

        trace!(
            client = %client,
            tokens = evaluation.tokens,
            elapsed = evaluation.elapsed,
            added = evaluation.added,
            "Distributed token bucket evaluated"
        );

        Ok(evaluation)
    }

    /// Decide for `client` with an explicit deadline.
    pub async fn allow_within(&self, client: &str, deadline: Duration) -> Result<bool, EngineError> {
        let evaluation = self.evaluate(client, deadline).await?;

        // The store already deducted the token; nothing to commit here.
        let allowed = evaluation.admitted();
        if !allowed {
            debug!(
                client = %client,
                tokens = evaluation.tokens,
                capacity = self.capacity,
                "Distributed rate limit exceeded"
            );
        }
        Ok(allowed)
    }
}

#[async_trait]
impl AdmissionStrategy for DistributedTokenBucket {
    async fn allow(&self, key: &str) -> Result<bool, EngineError> {
        self.allow_within(key, self.timeout).await
    }

    fn name(&self) -> &'static str {
        "distributed_token_bucket"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, SharedStore};
    use std::sync::Arc;

    #[derive(Debug)]
    struct MalformedStore;

    #[async_trait]
    impl SharedStore for MalformedStore {
        async fn evaluate(
            &self,
            _keys: &BucketKeys,
            _now_ms: i64,
            _refill_rate: f64,
            _capacity: f64,
        ) -> Result<StoreEvaluation, StoreError> {
            Err(StoreError::MalformedReply("expected 3 elements, got 2".to_string()))
        }
    }

    #[derive(Debug)]
    struct SlowStore;

    #[async_trait]
    impl SharedStore for SlowStore {
        async fn evaluate(
            &self,
            _keys: &BucketKeys,
            _now_ms: i64,
            _refill_rate: f64,
            _capacity: f64,
        ) -> Result<StoreEvaluation, StoreError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(StoreEvaluation {
                tokens: 5.0,
                elapsed: 0.0,
                added: 0.0,
            })
        }
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        let store: SharedStoreHandle = Arc::new(MemoryStore::new());
        assert!(matches!(
            DistributedTokenBucket::new(store.clone(), 0.0, 1.0),
            Err(EngineError::InvalidParameters(_))
        ));
        assert!(matches!(
            DistributedTokenBucket::new(store, 5.0, 0.0),
            Err(EngineError::InvalidParameters(_))
        ));
    }

    #[tokio::test]
    async fn test_admits_capacity_then_denies() {
        let store = Arc::new(MemoryStore::new());
        let bucket = DistributedTokenBucket::new(store.clone(), 3.0, 0.001).unwrap();

        for i in 1..=3 {
            assert!(bucket.allow("10.0.0.1").await.unwrap(), "Request {} should be admitted", i);
        }
        assert!(!bucket.allow("10.0.0.1").await.unwrap());
    }

    #[tokio::test]
    async fn test_store_deducts_exactly_once() {
        let store = Arc::new(MemoryStore::new());
        let bucket = DistributedTokenBucket::new(store.clone(), 5.0, 0.001).unwrap();

        assert!(bucket.allow("10.0.0.1").await.unwrap());

        let remaining = store.tokens(&bucket.keys_for("10.0.0.1")).unwrap();
        assert!((remaining - 4.0).abs() < 0.01, "remaining = {}", remaining);
    }

    #[tokio::test]
    async fn test_clients_have_separate_buckets() {
        let store = Arc::new(MemoryStore::new());
        let bucket = DistributedTokenBucket::new(store.clone(), 1.0, 0.001).unwrap();

        assert!(bucket.allow("a").await.unwrap());
        assert!(!bucket.allow("a").await.unwrap());
        assert!(bucket.allow("b").await.unwrap());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_buckets_sharing_a_store_share_state() {
        // Two instances over one store behave like two server processes
        let store: SharedStoreHandle = Arc::new(MemoryStore::new());
        let first = DistributedTokenBucket::new(store.clone(), 2.0, 0.001).unwrap();
        let second = DistributedTokenBucket::new(store, 2.0, 0.001).unwrap();

        assert!(first.allow("client").await.unwrap());
        assert!(second.allow("client").await.unwrap());
        assert!(!first.allow("client").await.unwrap());
        assert!(!second.allow("client").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_single_token() {
        let store: SharedStoreHandle = Arc::new(MemoryStore::new());
        let bucket = Arc::new(DistributedTokenBucket::new(store, 1.0, 0.0001).unwrap());

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let bucket = bucket.clone();
                tokio::spawn(async move { bucket.allow("shared").await.unwrap() })
            })
            .collect();

        let admitted = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();

        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn test_malformed_reply_is_store_unavailable() {
        let bucket = DistributedTokenBucket::new(Arc::new(MalformedStore), 5.0, 1.0).unwrap();

        let err = bucket.allow("client").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::StoreUnavailable(StoreError::MalformedReply(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_store_unavailable() {
        let bucket = DistributedTokenBucket::new(Arc::new(SlowStore), 5.0, 1.0)
            .unwrap()
            .with_timeout(Duration::from_millis(100));

        let err = bucket.allow("client").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::StoreUnavailable(StoreError::Timeout(d)) if d == Duration::from_millis(100)
        ));

        let err = bucket
            .allow_within("client", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::StoreUnavailable(StoreError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_custom_key_prefix() {
        let store = Arc::new(MemoryStore::new());
        let bucket = DistributedTokenBucket::new(store.clone(), 2.0, 1.0)
            .unwrap()
            .with_key_prefix("tenant");

        bucket.allow("x").await.unwrap();
        assert!(store
            .tokens(&BucketKeys::for_client("tenant", "x"))
            .is_some());
    }
}
