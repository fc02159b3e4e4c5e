//! In-process shared store.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use super::{BucketKeys, SharedStore, StoreEvaluation, StoredBucket};
use crate::error::StoreError;

/// A [`SharedStore`] kept in process memory.
///
/// Evaluations are serialized by a single lock, which gives the same
/// atomicity as the Redis script for callers within one process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: Mutex<HashMap<BucketKeys, StoredBucket>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tokens currently stored for `keys`, if the bucket exists.
    pub fn tokens(&self, keys: &BucketKeys) -> Option<f64> {
        self.buckets.lock().get(keys).map(|b| b.tokens)
    }

    /// Number of buckets held.
    pub fn len(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Whether no bucket has been created yet.
    pub fn is_empty(&self) -> bool {
        self.buckets.lock().is_empty()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn evaluate(
        &self,
        keys: &BucketKeys,
        now_ms: i64,
        refill_rate: f64,
        capacity: f64,
    ) -> Result<StoreEvaluation, StoreError> {
        let mut buckets = self.buckets.lock();
        let current = buckets.get(keys).copied();
        let (next, evaluation) = StoredBucket::evaluate(current, now_ms, refill_rate, capacity);
        buckets.insert(keys.clone(), next);

        trace!(
            key = %keys.tokens,
            tokens = evaluation.tokens,
            added = evaluation.added,
            "Evaluated in-memory bucket"
        );

        Ok(evaluation)
    }
}
