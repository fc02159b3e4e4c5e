//! Local token bucket rate limiting.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

use super::strategy::AdmissionStrategy;
use super::validate_bucket;
use crate::error::EngineError;

#[derive(Debug)]
struct TokenState {
    tokens: f64,
    last_refill: Instant,
}

/// A bucket of tokens refilled continuously up to a capacity.
///
/// Refill is computed lazily from the elapsed time at each decision, exactly
/// once per decision. A single lock covers refill and consumption, so two
/// callers can never both spend the last token.
#[derive(Debug)]
pub struct TokenBucket {
    /// Maximum tokens held
    capacity: f64,
    /// Tokens added per second
    refill_rate: f64,
    state: Mutex<TokenState>,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: f64, refill_rate: f64) -> Result<Self, EngineError> {
        validate_bucket("token bucket", capacity, refill_rate)?;
        Ok(Self {
            capacity,
            refill_rate,
            state: Mutex::new(TokenState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        })
    }

    /// Spend one token if available.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    fn try_acquire_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();

        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
        if now > state.last_refill {
            state.last_refill = now;
        }

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens held as of the last decision.
    pub fn tokens(&self) -> f64 {
        self.state.lock().tokens
    }
}

#[async_trait]
impl AdmissionStrategy for TokenBucket {
    async fn allow(&self, key: &str) -> Result<bool, EngineError> {
        let allowed = self.try_acquire();
        trace!(key = %key, allowed, "Token bucket decision");
        Ok(allowed)
    }

    fn name(&self) -> &'static str {
        "token_bucket"
    }
}
