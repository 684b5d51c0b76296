//! Bounded exponential backoff for single RPC calls.
//!
//! Attempt `n` (1-based) that fails waits
//! `min(initial_delay * backoff_factor^(n-1), max_delay)` before attempt
//! `n + 1`. No sleep follows the final attempt; its error is returned
//! unchanged.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first; values below 1 behave as 1
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Multiplier applied after each failure
    pub backoff_factor: f64,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Delay to wait after failed attempt `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        Duration::try_from_secs_f64(scaled)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Runs an async operation under a [`RetryConfig`].
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create an executor with the given policy.
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Policy in use.
    #[must_use]
    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Retry `op` on every error.
    ///
    /// # Errors
    ///
    /// Returns the last attempt's error once attempts are exhausted.
    pub async fn run<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.run_if(op, |_| true).await
    }

    /// Retry `op` only while `should_retry` accepts the error.
    ///
    /// A rejected error is returned immediately without sleeping.
    ///
    /// # Errors
    ///
    /// Returns the first rejected error, or the last error once attempts are
    /// exhausted.
    pub async fn run_if<T, E, F, Fut, P>(&self, mut op: F, should_retry: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if attempt >= max_attempts || !should_retry(&e) => {
                    if attempt > 1 {
                        warn!(attempt, error = %e, "Giving up after retries");
                    }
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.config.delay_for(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
