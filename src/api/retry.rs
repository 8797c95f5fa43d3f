//! Bounded retries with exponential backoff for remote store calls.

use crate::error::{Error, ErrorType, Res, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(250);
const MAX_DELAY: Duration = Duration::from_secs(30);

/// How long to wait for each attempt at a remote call and how often to try again.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RetryPolicy {
    timeout: Duration,
    max_retries: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(timeout: Duration, max_retries: u32) -> Self {
        Self {
            timeout,
            max_retries,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retries(timeout: Duration) -> Self {
        Self::new(timeout, 0)
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// The wait before retry number `attempt` (zero-based): `base_delay * 2^attempt`, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(MAX_DELAY)
    }

    /// Runs `op` until it succeeds, fails in a way that retrying cannot fix, or the retries are
    /// used up. `what` describes the operation for messages, e.g. "add a transaction".
    ///
    /// Failures are reported as `ErrorType::Store`, or `ErrorType::Timeout` when the last attempt
    /// ran out of time. An error that already carries a different `ErrorType` keeps it and is not
    /// retried.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Res<T>>,
    {
        let mut attempt = 0;
        loop {
            let error = match tokio::time::timeout(self.timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => Error::from_anyhow(e.context(format!("Unable to {what}")), ErrorType::Store),
                Err(_) => Error::msg(
                    ErrorType::Timeout,
                    format!(
                        "Timed out after {}ms trying to {what}",
                        self.timeout.as_millis()
                    ),
                ),
            };

            if !error.is_retryable() || attempt >= self.max_retries {
                debug!("Giving up after {} attempt(s) to {what}", attempt + 1);
                return Err(error);
            }

            let delay = self.delay(attempt);
            warn!(
                "Attempt {} to {what} failed, retrying in {}ms: {error}",
                attempt + 1,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
