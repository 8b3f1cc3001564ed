//! Shared per-API rate limiting
//!
//! One `ApiRateLimiter` exists per external API and is shared (via `Arc`) by
//! every caller of that API, so pacing holds across concurrent stage runs
//! instead of per request.

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::time::Duration;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Token bucket allowing one request per `interval`
pub struct ApiRateLimiter {
    name: &'static str,
    interval: Duration,
    /// `None` when the interval is zero (pacing disabled)
    limiter: Option<DirectLimiter>,
}

impl ApiRateLimiter {
    /// Create a limiter named after the API it guards
    ///
    /// A zero interval disables pacing entirely.
    pub fn new(name: &'static str, interval: Duration) -> Self {
        let limiter = Quota::with_period(interval).map(RateLimiter::direct);

        Self {
            name,
            interval,
            limiter,
        }
    }

    /// Wait until the next request may be sent
    pub async fn acquire(&self) {
        if let Some(limiter) = &self.limiter {
            if limiter.check().is_err() {
                tracing::debug!(
                    api = self.name,
                    interval_ms = self.interval.as_millis() as u64,
                    "Rate limiting: waiting for next slot"
                );
                limiter.until_ready().await;
            }
        }
    }
}

impl std::fmt::Debug for ApiRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRateLimiter")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .finish()
    }
}
