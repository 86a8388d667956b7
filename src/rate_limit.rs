// src/rate_limit.rs

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::RateLimitConfig;
use crate::error::{CleanError, Result};

/// Token bucket shared by every backend invocation of a run.
///
/// A non-positive rate disables limiting.
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    rps: f64,
    burst: f64,
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(rps: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        RateLimiter {
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
            rps: if rps.is_finite() { rps } else { 0.0 },
            burst,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.rps, config.burst)
    }

    pub fn is_unlimited(&self) -> bool {
        self.rps <= 0.0
    }

    fn lock(&self) -> MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rps).min(self.burst);
        bucket.last_refill = now;
    }

    /// Takes a token if one is available, otherwise returns how long until one is.
    fn reserve(&self) -> Option<Duration> {
        if self.is_unlimited() {
            return None;
        }
        let mut bucket = self.lock();
        self.refill(&mut bucket, Instant::now());
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            None
        } else {
            let missing = 1.0 - bucket.tokens;
            Some(Duration::from_secs_f64(missing / self.rps))
        }
    }

    /// Non-blocking; consumes a token on success.
    pub fn try_allow(&self) -> bool {
        self.reserve().is_none()
    }

    /// Waits for a token, giving up with `CANCELLED` when `cancel` fires.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(CleanError::cancelled("cancelled while waiting for rate limiter"));
            }
            let delay = match self.reserve() {
                None => return Ok(()),
                Some(delay) => delay,
            };
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(CleanError::cancelled("cancelled while waiting for rate limiter"));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
