//! Outbound request pacing.
//!
//! Two policies: a fixed token bucket, and an adaptive policy that trusts
//! the provider's rate-limit headers when they are present and falls back
//! to the fixed bucket when they are not.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How close a rate-limit reset must be for the adaptive limiter to wait
/// it out instead of falling back to fixed pacing.
const RESET_HORIZON: Duration = Duration::from_secs(120);

/// Rate-limit state reported by the provider on the previous response.
#[derive(Debug, Clone)]
pub struct RateHints {
    /// Requests left in the current window.
    pub remaining: u64,
    /// When the window resets, if the provider said so.
    pub reset_at: Option<SystemTime>,
}

impl RateHints {
    /// Parse `x-ratelimit-remaining` / `x-ratelimit-reset` headers.
    /// Returns `None` when the remaining count is absent or malformed.
    pub fn from_headers(headers: &reqwest::header::HeaderMap) -> Option<Self> {
        let remaining = headers
            .get("x-ratelimit-remaining")?
            .to_str()
            .ok()?
            .parse::<u64>()
            .ok()?;

        let reset_at = headers
            .get("x-ratelimit-reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|epoch| UNIX_EPOCH + Duration::from_secs(epoch));

        Some(Self {
            remaining,
            reset_at,
        })
    }
}

/// Pacing policy applied by dispatch workers before each outbound request.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Block until the next request may go out, or until cancellation.
    async fn wait(&self, cancel: &CancellationToken, last: Option<&RateHints>);
}

/// Token bucket with burst 1: one request per interval, shared across
/// all dispatch workers.
pub struct FixedRateLimiter {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl FixedRateLimiter {
    /// A limiter allowing `requests_per_sec` requests per second.
    /// Non-positive rates disable pacing.
    pub fn new(requests_per_sec: f64) -> Self {
        let interval = if requests_per_sec > 0.0 {
            Duration::from_secs_f64(1.0 / requests_per_sec)
        } else {
            Duration::ZERO
        };
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }
}

#[async_trait]
impl RateLimiter for FixedRateLimiter {
    async fn wait(&self, cancel: &CancellationToken, _last: Option<&RateHints>) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = (*next).max(now);
            *next = slot + self.interval;
            slot
        };

        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep_until(slot) => {}
        }
    }
}

/// Limiter that follows the provider's own rate-limit accounting.
///
/// With requests remaining in the window it lets the caller through
/// immediately. With the window exhausted and the reset close, it sleeps
/// until the reset. In every other case it defers to fixed pacing.
pub struct AdaptiveRateLimiter {
    fallback: FixedRateLimiter,
}

impl AdaptiveRateLimiter {
    pub fn new(requests_per_sec: f64) -> Self {
        Self {
            fallback: FixedRateLimiter::new(requests_per_sec),
        }
    }
}

#[async_trait]
impl RateLimiter for AdaptiveRateLimiter {
    async fn wait(&self, cancel: &CancellationToken, last: Option<&RateHints>) {
        if let Some(hints) = last {
            if hints.remaining > 0 {
                return;
            }

            let until_reset = hints
                .reset_at
                .and_then(|reset_at| reset_at.duration_since(SystemTime::now()).ok());
            if let Some(until_reset) = until_reset {
                if until_reset <= RESET_HORIZON {
                    // Window exhausted; the extra second rides out clock skew
                    debug!(secs = until_reset.as_secs(), "rate limit exhausted, waiting for reset");
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(until_reset + Duration::from_secs(1)) => {}
                    }
                    return;
                }
            }
        }

        self.fallback.wait(cancel, last).await;
    }
}
