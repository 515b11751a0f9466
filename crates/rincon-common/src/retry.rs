//! Retry and timeout utilities.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::TimeoutError;

/// Retry configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts (1 = no retries).
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Backoff multiplier (2.0 doubles the delay each attempt).
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Build a config from an attempt count and an initial delay.
    pub fn with_attempts(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            ..Default::default()
        }
    }

    /// Delay to wait before the given attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let base =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi((attempt - 2) as i32);

        Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()))
    }
}

/// Retry a fallible async operation with exponential backoff.
///
/// Returns the last error once every attempt has failed.
pub async fn retry_with_backoff<T, E, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        if attempt > 1 {
            let delay = config.delay_for_attempt(attempt);
            debug!(attempt, ?delay, "Retrying after delay");
            sleep(delay).await;
        }

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retries");
                }
                return Ok(value);
            }
            Err(e) if attempt >= attempts => {
                warn!(attempt, max_attempts = attempts, error = %e, "Giving up");
                return Err(e);
            }
            Err(e) => {
                debug!(attempt, max_attempts = attempts, error = %e, "Attempt failed");
                attempt += 1;
            }
        }
    }
}

/// Race an operation against a deadline.
///
/// The operation future is dropped when the deadline elapses, which aborts
/// whatever it had in flight.
pub async fn with_timeout<T, Fut>(timeout: Duration, operation: Fut) -> Result<T, TimeoutError>
where
    Fut: Future<Output = T>,
{
    tokio::time::timeout(timeout, operation)
        .await
        .map_err(|_| TimeoutError(timeout))
}
