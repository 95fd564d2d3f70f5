//! Client-side request throttling
//!
//! The Backlog API throttles request volume without documenting the limit, so
//! the client pauses pre-emptively after every N outbound calls. One limiter is
//! created per invocation and shared by every client that talks to the server.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

use crate::config::RateLimitConfig;

/// Counts outbound API calls and enforces a cool-down after every Nth call
#[derive(Debug)]
pub struct RateLimiter {
    count: AtomicU64,
    pauses: AtomicU64,
    requests_per_pause: u64,
    cooldown: Duration,
}

impl RateLimiter {
    pub fn new(requests_per_pause: u64, cooldown: Duration) -> Self {
        Self {
            count: AtomicU64::new(0),
            pauses: AtomicU64::new(0),
            requests_per_pause,
            cooldown,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_pause, config.cooldown())
    }

    /// Record one outbound request, sleeping first when a pause is due.
    ///
    /// Must be called immediately before every API call. Returns the running
    /// request count including this call.
    pub async fn increment(&self) -> u64 {
        let current = self.count.fetch_add(1, Ordering::SeqCst) + 1;

        if self.should_pause(current) {
            self.pauses.fetch_add(1, Ordering::SeqCst);
            info!(
                "Waiting {}s to stay under the API rate limit ({} requests so far)",
                self.cooldown.as_secs(),
                current
            );
            tokio::time::sleep(self.cooldown).await;
        }

        current
    }

    fn should_pause(&self, current: u64) -> bool {
        self.requests_per_pause > 0 && current > 1 && current % self.requests_per_pause == 0
    }

    /// Requests recorded so far
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    /// Cool-downs taken so far
    pub fn pauses(&self) -> u64 {
        self.pauses.load(Ordering::SeqCst)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_pauses_every_hundred_requests() {
        let limiter = RateLimiter::new(100, Duration::from_secs(15));
        let start = Instant::now();

        for _ in 0..250 {
            limiter.increment().await;
        }

        assert_eq!(limiter.count(), 250);
        assert_eq!(limiter.pauses(), 2);
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(start.elapsed() < Duration::from_secs(45));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_pause_before_threshold() {
        let limiter = RateLimiter::default();
        let start = Instant::now();

        for expected in 1..=99 {
            assert_eq!(limiter.increment().await, expected);
        }

        assert_eq!(limiter.pauses(), 0);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_call_never_pauses() {
        let limiter = RateLimiter::new(1, Duration::from_secs(15));

        limiter.increment().await;
        assert_eq!(limiter.pauses(), 0);

        limiter.increment().await;
        assert_eq!(limiter.pauses(), 1);
    }

    #[tokio::test]
    async fn test_disabled_when_interval_is_zero() {
        let limiter = RateLimiter::new(0, Duration::from_secs(15));
        for _ in 0..300 {
            limiter.increment().await;
        }
        assert_eq!(limiter.pauses(), 0);
    }

    #[quickcheck]
    fn prop_pause_count_is_floor_of_calls(calls: u16) -> bool {
        let calls = u64::from(calls % 1000);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("Failed to build runtime");

        runtime.block_on(async {
            let limiter = RateLimiter::new(100, Duration::ZERO);
            for _ in 0..calls {
                limiter.increment().await;
            }
            limiter.pauses() == calls / 100
        })
    }
}
