//! Spacing for host snapshot calls

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::Result;

/// A leaky bucket of one: callers wait until `min_interval` has passed since
/// the last successful snapshot, then dispatch. Nothing is ever rejected.
///
/// Clones share the same timestamp, so every session spawned by one
/// coordinator draws from the same quota.
#[derive(Debug, Clone)]
pub struct SnapshotRateLimiter {
    min_interval: Duration,
    last_success: Arc<Mutex<Option<Instant>>>,
}

impl SnapshotRateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, last_success: Arc::new(Mutex::new(None)) }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Run one snapshot call once the interval has elapsed.
    ///
    /// Calls are serialized; the timestamp is taken when `call` succeeds.
    /// Dropping the returned future (e.g. on cancellation) releases the
    /// slot without recording anything.
    pub async fn run<T, F, Fut>(&self, call: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last = self.last_success.lock().await;
        if let Some(prev) = *last {
            let ready = prev + self.min_interval;
            let now = Instant::now();
            if now < ready {
                log::debug!("snapshot throttled for {}ms", (ready - now).as_millis());
                tokio::time::sleep_until(ready).await;
            }
        }

        let result = call().await;
        if result.is_ok() {
            *last = Some(Instant::now());
        }
        result
    }
}
