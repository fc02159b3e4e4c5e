//! Shared state backends for the distributed token bucket.
//!
//! A store exposes a single atomic operation: refill a client's token bucket
//! from elapsed time and conditionally consume one token, as one indivisible
//! unit. All cross-caller and cross-instance mutual exclusion lives here.

mod memory;
mod redis_store;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreError;

/// Process-wide handle to a shared store, created once at startup.
pub type SharedStoreHandle = Arc<dyn SharedStore>;

/// The pair of keys holding one client's bucket state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKeys {
    /// Key of the current token count
    pub tokens: String,
    /// Key of the last refill timestamp (Unix milliseconds)
    pub last_refill: String,
}

impl BucketKeys {
    /// Derive the keys for a client identity.
    ///
    /// The client is wrapped in a hash tag so both keys land in the same
    /// Redis Cluster slot.
    pub fn for_client(prefix: &str, client: &str) -> Self {
        Self {
            tokens: format!("{}.{{{}}}.tokens", prefix, client),
            last_refill: format!("{}.{{{}}}.lastRefilled", prefix, client),
        }
    }
}

/// Outcome of one atomic evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreEvaluation {
    /// Tokens available to this call after refill and before its deduction.
    ///
    /// The store has already deducted one token iff this is at least 1.
    pub tokens: f64,
    /// Seconds since the previous refill
    pub elapsed: f64,
    /// Tokens added by this refill
    pub added: f64,
}

impl StoreEvaluation {
    /// Whether the evaluation consumed a token for this call.
    pub fn admitted(&self) -> bool {
        self.tokens >= 1.0
    }
}

/// A store able to run the refill-and-consume step atomically.
#[async_trait]
pub trait SharedStore: Send + Sync + std::fmt::Debug {
    /// Atomically refill the bucket addressed by `keys` and consume one token
    /// if one is available.
    ///
    /// `now_ms` is the caller's Unix timestamp in milliseconds, `refill_rate`
    /// is in tokens per second.
    async fn evaluate(
        &self,
        keys: &BucketKeys,
        now_ms: i64,
        refill_rate: f64,
        capacity: f64,
    ) -> Result<StoreEvaluation, StoreError>;
}

/// Bucket state as persisted by a store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct StoredBucket {
    pub tokens: f64,
    pub last_refill_ms: i64,
}

impl StoredBucket {
    /// Apply one refill-and-consume step.
    ///
    /// A missing bucket starts full. The refill timestamp never moves
    /// backwards, so a caller with a lagging clock adds nothing.
    pub(crate) fn evaluate(
        current: Option<StoredBucket>,
        now_ms: i64,
        refill_rate: f64,
        capacity: f64,
    ) -> (StoredBucket, StoreEvaluation) {
        let current = current.unwrap_or(StoredBucket {
            tokens: capacity,
            last_refill_ms: now_ms,
        });

        let elapsed = (now_ms - current.last_refill_ms).max(0) as f64 / 1000.0;
        let added = elapsed * refill_rate;
        let available = (current.tokens + added).min(capacity);

        let next = StoredBucket {
            tokens: if available >= 1.0 { available - 1.0 } else { available },
            last_refill_ms: current.last_refill_ms.max(now_ms),
        };

        (
            next,
            StoreEvaluation {
                tokens: available,
                elapsed,
                added,
            },
        )
    }
}
