//! Minimum spacing between consecutive REST requests.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Default spacing between signed requests.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Serializes request starts so no two are closer than `min_interval`.
#[derive(Debug)]
pub struct RequestPacer {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RequestPacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    /// Wait until the next request may start, then claim the slot.
    pub async fn wait(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let pause = self.min_interval - elapsed;
                trace!(pause_ms = pause.as_millis() as u64, "Pacing REST request");
                tokio::time::sleep(pause).await;
            }
        }
        *last = Some(Instant::now());
    }
}

impl Default for RequestPacer {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test(start_paused = true)]
    async fn test_requests_are_spaced() {
        let pacer = RequestPacer::default();
        let started = Instant::now();

        pacer.wait().await;
        assert_eq!(started.elapsed(), Duration::ZERO);

        pacer.wait().await;
        pacer.wait().await;
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(started.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_pacer_does_not_wait() {
        let pacer = RequestPacer::default();
        pacer.wait().await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let before = Instant::now();
        pacer.wait().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_request_pends_until_interval_elapses() {
        let pacer = RequestPacer::default();
        pacer.wait().await;

        let mut next = task::spawn(pacer.wait());
        assert_pending!(next.poll());

        tokio::time::advance(Duration::from_millis(60)).await;
        assert_pending!(next.poll());

        tokio::time::advance(Duration::from_millis(40)).await;
        assert_ready!(next.poll());
    }
}
