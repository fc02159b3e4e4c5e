//! Admission strategy trait shared by local and distributed algorithms.

use async_trait::async_trait;

use crate::error::EngineError;

/// Trait for admission strategies.
///
/// This trait abstracts over the in-memory algorithms and the
/// `DistributedTokenBucket` so callers can gate requests with either.
/// Implementations are safe to call concurrently for the same key and for
/// different keys.
#[async_trait]
pub trait AdmissionStrategy: Send + Sync + std::fmt::Debug {
    /// Decide whether a request from `key` is admitted.
    ///
    /// `Ok(true)` means the request was admitted and its consumption is
    /// already recorded. `Ok(false)` means the limit is exhausted and nothing
    /// was consumed. Errors are engine failures, never policy denials.
    async fn allow(&self, key: &str) -> Result<bool, EngineError>;

    /// Short name of the algorithm, for logging.
    fn name(&self) -> &'static str;
}
