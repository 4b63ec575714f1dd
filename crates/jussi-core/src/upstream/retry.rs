//! Bounded retry with exponential backoff for upstream calls.

use std::{future::Future, time::Duration};

use tracing::debug;

use crate::upstream::errors::UpstreamError;

/// Retry schedule for transient upstream failures.
///
/// Defaults: 3 attempts, backoff `100ms * 2^(n-1)` capped at 5 seconds.
/// Cancellation is the caller's concern: the whole retried operation is
/// expected to run under a deadline (`tokio::time::timeout`), which aborts
/// any in-flight attempt or backoff sleep immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `n + 1`, given that attempt `n` (1-based) just
    /// failed.
    #[must_use]
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let factor = 1u32 << failed_attempt.saturating_sub(1).min(16);
        (self.initial_backoff * factor).min(self.max_backoff)
    }

    /// Runs `op` until it succeeds, fails permanently, or the attempt budget
    /// runs out.
    ///
    /// # Errors
    ///
    /// Returns the operation's error unchanged when it is not transient, or
    /// [`UpstreamError::RetriesExhausted`] after the final failed attempt.
    pub async fn retry<T, F, Fut>(&self, mut op: F) -> Result<T, UpstreamError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_err: Option<UpstreamError> = None;

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(self.backoff(attempt - 1)).await;
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    debug!(attempt, error = %err, "transient upstream failure");
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(UpstreamError::RetriesExhausted {
            attempts,
            last: Box::new(last_err.unwrap_or(UpstreamError::RequestTimeout)),
        })
    }
}
