//! Request guards backed by the shared cache: idempotency keys and a
//! per-identity sliding-window rate limiter.
//!
//! Both fail open: when the cache is unreachable the request proceeds and
//! the failure is logged.

use std::sync::Arc;
use std::time::Duration;

use epdd_db::cache::{CacheError, SharedCache};

use crate::error::PipelineError;

/// Rejects a repeated idempotency key within its TTL.
#[derive(Clone)]
pub struct IdempotencyGuard {
    cache: Arc<dyn SharedCache>,
    ttl: Duration,
    namespace: String,
}

impl IdempotencyGuard {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

    pub fn new(cache: Arc<dyn SharedCache>, ttl: Duration) -> Self {
        Self {
            cache,
            ttl,
            namespace: "idempotency:".to_string(),
        }
    }

    /// Claim `key`. Fails with [`PipelineError::Duplicate`] if it was
    /// already claimed within the TTL.
    pub async fn claim(&self, key: &str) -> Result<(), PipelineError> {
        let cache_key = format!("{}{}", self.namespace, key);
        match self.cache.set_nx(&cache_key, "1".to_string(), self.ttl).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::info!(idempotency_key = %key, "Duplicate request rejected");
                Err(PipelineError::Duplicate(key.to_string()))
            }
            Err(e) => {
                tracing::warn!(idempotency_key = %key, error = %e, "Idempotency check skipped");
                Ok(())
            }
        }
    }
}

/// Verdict of [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u64 },
    Limited { retry_after_secs: u64 },
}

/// Sliding-window limiter approximated from two fixed buckets.
///
/// The estimate is `current + previous * (1 - elapsed / window)`, where
/// `elapsed` is the time already spent in the current bucket. Only admitted
/// requests are counted.
#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<dyn SharedCache>,
    limit: u64,
    window: Duration,
    namespace: String,
}

impl RateLimiter {
    pub const DEFAULT_LIMIT: u64 = 100;
    pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

    pub fn new(cache: Arc<dyn SharedCache>, limit: u64, window: Duration) -> Self {
        Self {
            cache,
            limit: limit.max(1),
            window,
            namespace: "ratelimit:".to_string(),
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub async fn check(&self, identity: &str) -> RateDecision {
        self.check_at(identity, chrono::Utc::now().timestamp_millis())
            .await
    }

    /// Decide on one request from `identity` at `now_ms` (epoch millis).
    pub async fn check_at(&self, identity: &str, now_ms: i64) -> RateDecision {
        let window = Window::new(self.window, self.limit, now_ms);

        let previous_key = format!("{}{}:{}", self.namespace, identity, window.bucket - 1);
        let current_key = format!("{}{}:{}", self.namespace, identity, window.bucket);

        let counts = async {
            let previous = self.cache.get(&previous_key).await?;
            let current = self.cache.get(&current_key).await?;
            Ok::<_, CacheError>((parse_count(previous), parse_count(current)))
        };
        let (previous, current) = match counts.await {
            Ok(counts) => counts,
            Err(e) => {
                tracing::warn!(identity = %identity, error = %e, "Rate limit check skipped");
                return RateDecision::Allowed {
                    remaining: self.limit,
                };
            }
        };

        if let Some(wait_ms) = window.wait_ms(previous, current) {
            let retry_after_secs = (wait_ms as u64).div_ceil(1000).max(1);
            tracing::info!(identity = %identity, previous, current, retry_after_secs, "Rate limit exceeded");
            return RateDecision::Limited { retry_after_secs };
        }

        let current = match self.cache.incr(&current_key, self.window * 2).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(identity = %identity, error = %e, "Rate limit check skipped");
                return RateDecision::Allowed {
                    remaining: self.limit,
                };
            }
        };
        RateDecision::Allowed {
            remaining: window.remaining(previous, current),
        }
    }
}

fn parse_count(raw: Option<String>) -> i64 {
    raw.and_then(|v| v.parse().ok()).unwrap_or(0)
}

/// Fixed-point arithmetic over one bucket, scaled by the window length so
/// the previous bucket's weight stays exact.
struct Window {
    bucket: i64,
    elapsed: i64,
    len: i64,
    limit: i64,
}

impl Window {
    fn new(window: Duration, limit: u64, now_ms: i64) -> Self {
        let len = (window.as_millis() as i64).max(1);
        Self {
            bucket: now_ms.div_euclid(len),
            elapsed: now_ms.rem_euclid(len),
            len,
            limit: limit as i64,
        }
    }

    /// `estimate * len` after counting `current` requests in this bucket.
    fn scaled_estimate(&self, previous: i64, current: i64) -> i64 {
        current * self.len + previous * (self.len - self.elapsed)
    }

    fn remaining(&self, previous: i64, current: i64) -> u64 {
        let slack = self.limit * self.len - self.scaled_estimate(previous, current);
        slack.max(0).div_euclid(self.len) as u64
    }

    /// Milliseconds until one more request fits, or `None` if it fits now.
    ///
    /// Assumes no further admissions in the meantime. The estimate only
    /// decreases with time, so waiting longer than this is always safe.
    fn wait_ms(&self, previous: i64, current: i64) -> Option<i64> {
        if self.scaled_estimate(previous, current + 1) <= self.limit * self.len {
            return None;
        }

        // Still within this bucket: the previous bucket decays.
        let slack = self.limit - current - 1;
        if slack >= 0 && previous > 0 {
            let at = self.len - (slack * self.len).div_euclid(previous);
            if at < self.len {
                return Some(at - self.elapsed);
            }
        }

        // In the next bucket this bucket becomes the decaying one.
        let slack = self.limit - 1;
        let at = if current > 0 {
            (self.len - (slack * self.len).div_euclid(current)).max(0)
        } else {
            0
        };
        Some(self.len - self.elapsed + at)
    }
}
