//! Process-wide rate limiter for outbound LLM requests.
//!
//! Providers meter by requests per unit time, so every LLM call in the
//! pipeline - regardless of which stage or worker issues it - goes through
//! one shared limiter that enforces a minimum spacing between calls.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum spacing between successive [`acquire`] returns.
///
/// # Invariants
/// - No two `acquire()` calls return closer than `min_spacing` apart on a
///   monotonic clock.
///
/// The timestamp lives behind a single async mutex and the wait happens while
/// the lock is held, which serializes acquisitions. Contention is expected:
/// outbound LLM requests are the bottleneck of the whole pipeline.
///
/// [`acquire`]: RateLimiter::acquire
#[derive(Debug)]
pub struct RateLimiter {
    min_spacing: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            min_spacing,
            last: Mutex::new(None),
        }
    }

    /// Block until at least `min_spacing` has elapsed since the previous
    /// acquisition returned.
    pub async fn acquire(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_spacing {
                tokio::time::sleep(self.min_spacing - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    pub fn min_spacing(&self) -> Duration {
        self.min_spacing
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sequential_acquisitions_are_spaced() {
        let limiter = RateLimiter::new(Duration::from_secs(2));

        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        assert!(start.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_acquisitions_are_spaced() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(500)));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }

        let mut stamps = Vec::new();
        for handle in handles {
            stamps.push(handle.await.unwrap());
        }
        stamps.sort();

        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn no_wait_after_spacing_already_elapsed() {
        let limiter = RateLimiter::new(Duration::from_secs(1));
        limiter.acquire().await;

        tokio::time::sleep(Duration::from_secs(5)).await;

        let before = Instant::now();
        limiter.acquire().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }
}
