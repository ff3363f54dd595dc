//! Exponential-backoff retry for unary worker calls.
//!
//! Only errors for which [`RpcError::is_transient`] holds are retried.
//! A call gives up after `max_retries` retries or once the next wait would
//! push the total elapsed time past `max_elapsed`, whichever comes first,
//! and surfaces the last error.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::RpcError;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on the delay between attempts.
    pub max_backoff: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Budget for all attempts and waits together.
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            max_elapsed: Duration::from_secs(30),
        }
    }
}

/// Calculate the next backoff delay from the current delay and policy.
///
/// The result is clamped to [`RetryPolicy::max_backoff`].
pub fn next_delay(current: Duration, policy: &RetryPolicy) -> Duration {
    let next_ms = (current.as_millis() as f64 * policy.multiplier) as u64;
    Duration::from_millis(next_ms).min(policy.max_backoff)
}

/// Run `call` until it succeeds, fails permanently or the policy is spent.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut call: F,
) -> Result<T, RpcError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RpcError>>,
{
    let started = Instant::now();
    let mut delay = policy.initial_backoff;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let err = match call().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => e,
        };

        if attempt > policy.max_retries || started.elapsed() + delay > policy.max_elapsed {
            tracing::warn!(operation, attempt, error = %err, "Worker call failed, retries exhausted");
            return Err(err);
        }

        tracing::warn!(
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Worker call failed, retrying",
        );
        tokio::time::sleep(delay).await;
        delay = next_delay(delay, policy);
    }
}
