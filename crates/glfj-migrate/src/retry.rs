//! Retry with exponential backoff.
//!
//! Transient errors are retried up to `max_attempts` times. Rate limit
//! responses are waited out using the server's `Retry-After` hint and are
//! counted against a separate cap so a throttled instance does not burn the
//! regular attempt budget.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};

use crate::error::{MigrationError, Result};

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts for transient errors (including the first).
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Whether to add jitter to delays.
    pub jitter: bool,
    /// Maximum number of rate limit waits before giving up.
    pub max_rate_limit_waits: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
            max_rate_limit_waits: 10,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy.
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            ..Default::default()
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
            max_rate_limit_waits: 0,
        }
    }

    /// Calculate delay for a given attempt number.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_delay_ms * self.multiplier.powi(attempt as i32 - 1);
        let capped_delay =
            Duration::from_millis(delay_ms.min(self.max_delay.as_millis() as f64) as u64);

        if self.jitter {
            // Add up to 25% jitter
            let jitter_factor = 1.0 + (rand::random::<f64>() * 0.25);
            Duration::from_millis((capped_delay.as_millis() as f64 * jitter_factor) as u64)
        } else {
            capped_delay
        }
    }

    /// Execute `operation`, retrying transient failures.
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        let mut rate_limit_waits = 0;

        loop {
            attempt += 1;

            let err = match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => e,
            };

            if !err.is_retryable() {
                return Err(err);
            }

            if let MigrationError::RateLimited { retry_after } = &err {
                rate_limit_waits += 1;
                if rate_limit_waits > self.max_rate_limit_waits {
                    tracing::warn!(
                        operation = operation_name,
                        waits = rate_limit_waits - 1,
                        "Rate limit waits exhausted"
                    );
                    return Err(err);
                }

                let delay = retry_after.unwrap_or_else(|| self.delay_for_attempt(rate_limit_waits));
                tracing::info!(
                    operation = operation_name,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, waiting"
                );
                tokio::time::sleep(delay).await;
                // Throttling does not count as a failed attempt.
                attempt -= 1;
                continue;
            }

            if attempt >= self.max_attempts {
                tracing::warn!(
                    operation = operation_name,
                    attempt = attempt,
                    max_attempts = self.max_attempts,
                    error = %err,
                    "Retry exhausted"
                );
                return Err(err);
            }

            let delay = self.delay_for_attempt(attempt);
            tracing::debug!(
                operation = operation_name,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying after delay"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Parse a `Retry-After` header given in seconds.
///
/// HTTP-date values are not used by GitLab or Forgejo and are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
