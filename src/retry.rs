//! Exponential backoff for network calls.
//!
//! [`RetryPolicy::run`] wraps one call site: it re-invokes the operation
//! while the error is classified as retryable, sleeping
//! `base_delay * factor^(n-1)` (capped at `max_delay`) between attempts.
//! Without `max_attempts` it retries forever; with it, running out of
//! attempts yields [`RetryError::Exhausted`], which the pipeline treats as
//! fatal.
//!
//! Defaults: 100ms, 200ms, 400ms, ... capped at 10s.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    base_delay: Duration,
    factor: f64,
    max_delay: Duration,
    max_attempts: Option<u32>,
}

/// Why [`RetryPolicy::run`] gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The error was not retryable; returned after the attempt that raised it.
    Permanent(E),
    /// Every allowed attempt failed with a retryable error.
    Exhausted {
        operation: String,
        attempts: u32,
        last: E,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(
        base_delay: Duration,
        factor: f64,
        max_delay: Duration,
        max_attempts: Option<u32>,
    ) -> Self {
        Self {
            base_delay,
            factor,
            max_delay,
            max_attempts,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            config.factor,
            Duration::from_millis(config.max_delay_ms),
            (config.max_attempts > 0).then_some(config.max_attempts),
        )
    }

    /// A policy that never retries, for one-shot health checks.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: Some(1),
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Sleep before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let secs = self.base_delay.as_secs_f64() * self.factor.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Run `op` until it succeeds, fails permanently, or runs out of attempts.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        operation: &str,
        is_retryable: P,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(operation, attempt, "recovered after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !is_retryable(&e) => return Err(RetryError::Permanent(e)),
                Err(e) => {
                    if self.max_attempts.is_some_and(|max| attempt >= max) {
                        tracing::error!(operation, attempt, error = %e, "giving up");
                        return Err(RetryError::Exhausted {
                            operation: operation.to_string(),
                            attempts: attempt,
                            last: e,
                        });
                    }
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
