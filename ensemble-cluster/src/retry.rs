//! Retry policy for operations that may hit transient failures
//!
//! Sends never retry on their own. Callers that want retries wrap the call
//! in a [`RetryPolicy`], which only retries the error kinds it allows:
//! by default communication failures, never missing routes.

use crate::error::{ErrorKind, Result};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    /// Delay before the first retry, doubled after each one
    pub backoff: Duration,
    pub max_backoff: Duration,
    /// Error kinds worth retrying
    pub retry_on: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            retry_on: vec![ErrorKind::Communication],
        }
    }
}

impl RetryPolicy {
    /// A policy that runs the operation exactly once
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration, max_backoff: Duration) -> Self {
        self.backoff = backoff;
        self.max_backoff = max_backoff;
        self
    }

    pub fn retry_on(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retry_on = kinds.into_iter().collect();
        self
    }

    pub fn should_retry(&self, kind: ErrorKind) -> bool {
        self.retry_on.contains(&kind)
    }

    /// Run `operation`, retrying allowed failures with exponential backoff
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.backoff;
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries && self.should_retry(e.kind()) => {
                    attempt += 1;
                    debug!(
                        attempt,
                        max_retries = self.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Retrying after failure"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.max_backoff);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
