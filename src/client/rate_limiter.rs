//! Global minimum-interval rate limiting
//!
//! One limiter instance is shared by every caller of a budget (publishing
//! or processing). `acquire` reserves a grant slot under a mutex in O(1)
//! and sleeps outside the lock, so the spacing invariant holds across all
//! callers without serializing their waits.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

pub struct RateLimiter {
    min_interval: Option<Duration>,
    // Earliest instant at which the next permit may be granted
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// `rate` is permits per second; a rate of zero (or less) disables
    /// limiting entirely.
    pub fn new(rate: f64) -> Self {
        let min_interval = (rate > 0.0).then(|| Duration::from_secs_f64(1.0 / rate));
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0.0)
    }

    /// Wait until at least `1/rate` has elapsed since the previously
    /// granted permit, then return. Callers are granted slots in lock
    /// acquisition order.
    pub async fn acquire(&self) {
        let Some(interval) = self.min_interval else {
            return;
        };

        let grant = {
            let mut slot = match self.next_slot.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let now = Instant::now();
            let grant = match *slot {
                Some(next) if next > now => next,
                _ => now,
            };
            *slot = Some(grant + interval);
            grant
        };

        tokio::time::sleep_until(grant).await;
    }

    /// The enforced spacing, if any. Exposed for wiring diagnostics.
    pub fn min_interval(&self) -> Option<Duration> {
        self.min_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_sequential_acquires_are_spaced() {
        let limiter = RateLimiter::new(100.0); // 10ms interval
        let start = Instant::now();

        for _ in 0..5 {
            limiter.acquire().await;
        }

        // First permit is immediate, the remaining four each wait 10ms
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquires_hold_global_spacing() {
        let limiter = Arc::new(RateLimiter::new(200.0)); // 5ms interval
        let start = Instant::now();

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.acquire().await;
                    Instant::now()
                })
            })
            .collect();

        let mut grants = Vec::new();
        for task in tasks {
            grants.push(task.await.unwrap());
        }
        grants.sort();

        for pair in grants.windows(2) {
            let gap = pair[1].duration_since(pair[0]);
            assert!(
                gap >= Duration::from_millis(4),
                "grants spaced {gap:?}, expected >= ~5ms"
            );
        }

        // 10 permits at 200/s: last grant at least 45ms after the first
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_limiter_grants_immediately() {
        let limiter = RateLimiter::new(10.0);
        limiter.acquire().await;

        // A long idle period resets the budget; no carried-over debt
        tokio::time::sleep(Duration::from_secs(1)).await;
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test]
    async fn test_unlimited_never_waits() {
        let limiter = RateLimiter::unlimited();
        assert!(limiter.min_interval().is_none());
        for _ in 0..1000 {
            limiter.acquire().await;
        }
    }
}
