//! Fixed window rate limiting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, trace};

use super::strategy::AdmissionStrategy;
use crate::error::EngineError;

/// A counter of admitted requests that is cleared once per interval.
///
/// The count is reset by a background task spawned at construction, which
/// takes the same lock as decisions, so no decision observes a torn reset.
/// Bursts straddling a window boundary can admit up to twice the limit in a
/// short span; this is inherent to fixed windows.
///
/// The reset task stops when [`FixedWindow::stop`] is called or the window
/// is dropped.
pub struct FixedWindow {
    /// Maximum admits per interval
    limit: u64,
    /// Length of each window
    interval: Duration,
    /// Admits in the current window
    count: Arc<Mutex<u64>>,
    /// Cancellation signal observed by the reset task
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for FixedWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedWindow")
            .field("limit", &self.limit)
            .field("interval", &self.interval)
            .field("count", &*self.count.lock())
            .finish()
    }
}

impl FixedWindow {
    /// Create a fixed window and start its reset task.
    ///
    /// Fails outside a Tokio runtime.
    pub fn new(limit: u64, interval: Duration) -> Result<Self, EngineError> {
        if limit == 0 {
            return Err(EngineError::InvalidParameters(
                "fixed window limit must be positive".to_string(),
            ));
        }
        if interval.is_zero() {
            return Err(EngineError::InvalidParameters(
                "fixed window interval must be positive".to_string(),
            ));
        }

        let handle = Handle::try_current().map_err(|_| {
            EngineError::InvalidParameters("fixed window requires a Tokio runtime".to_string())
        })?;

        let count = Arc::new(Mutex::new(0));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let ticker = {
            let _runtime = handle.enter();
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        };
        handle.spawn(reset_loop(count.clone(), ticker, shutdown_rx));

        debug!(limit, interval = ?interval, "Created fixed window");

        Ok(Self {
            limit,
            interval,
            count,
            shutdown,
        })
    }

    /// Admit a request if the current window has room.
    pub fn try_acquire(&self) -> bool {
        let mut count = self.count.lock();
        if *count < self.limit {
            *count += 1;
            true
        } else {
            false
        }
    }

    /// Admits recorded in the current window.
    pub fn count(&self) -> u64 {
        *self.count.lock()
    }

    /// Stop future resets. Decisions keep working against the current count.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Whether the reset task has been asked to stop.
    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }
}

impl Drop for FixedWindow {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn reset_loop(
    count: Arc<Mutex<u64>>,
    mut ticker: Interval,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let mut count = count.lock();
                trace!(previous = *count, "Resetting fixed window");
                *count = 0;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Fixed window reset stopped");
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl AdmissionStrategy for FixedWindow {
    async fn allow(&self, key: &str) -> Result<bool, EngineError> {
        let allowed = self.try_acquire();
        trace!(key = %key, allowed, "Fixed window decision");
        Ok(allowed)
    }

    fn name(&self) -> &'static str {
        "fixed_window"
    }
}
