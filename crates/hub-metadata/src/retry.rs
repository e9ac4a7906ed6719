//! Bounded retry with per-attempt timeout, exponential backoff and jitter.
//!
//! Every hub query runs under a [`RetryPolicy`]. A query gets at most
//! `attempts` tries; each try is cut off after `timeout`. Only errors that
//! [`HubError::is_retryable`] reports as transient are retried.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::HubError;
use crate::Result;

/// Timeout and retry budget for one remote lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total tries, including the first (minimum 1)
    pub attempts: u32,
    /// Deadline for a single try
    pub timeout: Duration,
    /// Delay before the second try
    pub initial_backoff: Duration,
    /// Upper bound for any delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            timeout: Duration::from_secs(15),
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Policy with a single try and the given timeout.
    pub fn no_retry(timeout: Duration) -> Self {
        Self {
            attempts: 1,
            timeout,
            ..Default::default()
        }
    }

    /// Run `operation` until it succeeds, fails permanently, or the budget
    /// is spent. The last error is returned.
    pub async fn run<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut delay = self.initial_backoff;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let outcome = match tokio::time::timeout(self.timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(HubError::Timeout {
                    operation: operation_name.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                }),
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                debug!(operation = %operation_name, attempt, error = %err, "permanent failure");
                return Err(err);
            }
            if attempt >= attempts {
                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %err,
                    "retry budget exhausted"
                );
                return Err(err);
            }

            // 0.5x to 1.5x of the nominal delay
            let jitter = rand::thread_rng().gen_range(0.5..1.5);
            let jittered = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

            debug!(
                operation = %operation_name,
                attempt,
                error = %err,
                delay_ms = jittered.as_millis() as u64,
                "transient failure, retrying"
            );

            tokio::time::sleep(jittered).await;

            delay = Duration::from_secs_f64(
                (delay.as_secs_f64() * 2.0).min(self.max_backoff.as_secs_f64()),
            );
        }
    }
}
