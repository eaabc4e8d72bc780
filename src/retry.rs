//! Retry Policy
//!
//! Minimal policy-based retries for idempotent remote calls. The Planner
//! feedback call is the only consumer with retries enabled; the Generator is
//! never retried because replaying it would duplicate actions.

use std::future::Future;
use std::time::Duration;

use crate::error::EngineError;

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    /// Delay before each retry.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            retry_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            retry_delay: Duration::from_millis(0),
        }
    }

    /// Set the number of retries after the first failure.
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay before each retry.
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Whether a failed attempt should be retried.
    pub fn should_retry(&self, error: &EngineError, attempt: u32) -> bool {
        attempt < self.max_retries && error.is_retryable()
    }

    /// Run `op` under this policy. `op` is invoked with the attempt number
    /// (0 for the initial try).
    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T, EngineError>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if self.should_retry(&err, attempt) => {
                    tracing::warn!(attempt, error = %err, "retrying after transient failure");
                    if !self.retry_delay.is_zero() {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
