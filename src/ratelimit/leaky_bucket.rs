//! Leaky bucket rate limiting.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

use super::strategy::AdmissionStrategy;
use super::validate_bucket;
use crate::error::EngineError;

#[derive(Debug)]
struct LeakyState {
    level: f64,
    last_leak: Instant,
}

/// A queue of fixed capacity draining at a constant rate.
///
/// Each admitted request adds one unit to the queue. The drain is computed
/// lazily at decision time, so no background task is needed.
#[derive(Debug)]
pub struct LeakyBucket {
    /// Maximum queued units
    capacity: f64,
    /// Units drained per second
    leak_rate: f64,
    state: Mutex<LeakyState>,
}

impl LeakyBucket {
    /// Create an empty bucket.
    pub fn new(capacity: f64, leak_rate: f64) -> Result<Self, EngineError> {
        validate_bucket("leaky bucket", capacity, leak_rate)?;
        Ok(Self {
            capacity,
            leak_rate,
            state: Mutex::new(LeakyState {
                level: 0.0,
                last_leak: Instant::now(),
            }),
        })
    }

    /// Admit a request if the drained queue has room for one more unit.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    fn try_acquire_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();

        let elapsed = now.saturating_duration_since(state.last_leak).as_secs_f64();
        state.level = (state.level - elapsed * self.leak_rate).max(0.0);
        if now > state.last_leak {
            state.last_leak = now;
        }

        if state.level + 1.0 <= self.capacity {
            state.level += 1.0;
            true
        } else {
            false
        }
    }

    /// Current queue level, as of the last decision.
    pub fn level(&self) -> f64 {
        self.state.lock().level
    }
}

#[async_trait]
impl AdmissionStrategy for LeakyBucket {
    async fn allow(&self, key: &str) -> Result<bool, EngineError> {
        let allowed = self.try_acquire();
        trace!(key = %key, allowed, "Leaky bucket decision");
        Ok(allowed)
    }

    fn name(&self) -> &'static str {
        "leaky_bucket"
    }
}
