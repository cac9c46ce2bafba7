use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::errors::ProviderError;

/// How a forwarder retries a failed request at its transport boundary
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Wait between two attempts
    pub backoff: Duration,
    pub retryable: fn(&ProviderError) -> bool,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl RetryPolicy {
    /// A single attempt
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
            retryable: |_| false,
        }
    }

    /// Retry only rate-limited requests, waiting `cooldown` before each retry
    pub fn rate_limit_cooldown(cooldown: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: cooldown,
            retryable: ProviderError::is_rate_limited,
        }
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or the attempts are
    /// used up. Waiting between attempts ends early when `cancel` fires.
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 1;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !(self.retryable)(&err) {
                return Err(err);
            }
            if attempt >= self.max_attempts {
                if self.max_attempts == 1 {
                    return Err(err);
                }
                return Err(ProviderError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            warn!(
                attempt,
                max_attempts = self.max_attempts,
                wait_secs = self.backoff.as_secs(),
                error = %err,
                "retrying request"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                _ = tokio::time::sleep(self.backoff) => {}
            }
            attempt += 1;
        }
    }
}
