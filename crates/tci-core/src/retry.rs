use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// A small retry policy: how many attempts, and how long to wait
/// between them.
///
/// Status and cancel reports to the queue retry without bound; docker
/// container creation retries a handful of times. Both are the same
/// loop with different limits.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: Option<u32>,
    backoff: Duration,
}

impl RetryPolicy {
    /// Retry forever (until the error stops being retryable).
    pub fn unbounded(backoff: Duration) -> Self {
        Self {
            max_attempts: None,
            backoff,
        }
    }

    /// Retry at most `max` attempts in total.
    pub fn attempts(max: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: Some(max),
            backoff,
        }
    }

    /// Drive `op` until it succeeds, the policy is exhausted, or
    /// `retryable` says the error is terminal. The last error is
    /// returned on give-up.
    pub async fn run<T, E, F, Fut, R>(&self, mut op: F, retryable: R) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        R: Fn(&E) -> bool,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    let exhausted = self.max_attempts.is_some_and(|max| attempt >= max);
                    if exhausted || !retryable(&e) {
                        return Err(e);
                    }

                    warn!(attempt, error = %e, "operation failed; retrying after backoff");
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }
    }
}
