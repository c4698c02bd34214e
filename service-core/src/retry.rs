//! Retry-then-fail combinator.
//!
//! Runs an async operation up to a fixed number of attempts and surfaces only
//! the error of the final attempt. Used around operations that may partially
//! succeed and converge when repeated, such as an account nuke.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// How many times to run an operation and how long to wait in between.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub attempts: u32,
    /// Pause between attempts. `None` retries immediately.
    pub delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: None,
        }
    }
}

impl RetryPolicy {
    pub fn with_attempts(attempts: u32) -> Self {
        Self {
            attempts,
            ..Default::default()
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Run once, never retry.
    pub fn once() -> Self {
        Self::with_attempts(1)
    }
}

/// Execute `f` until it succeeds or the policy's attempts are exhausted.
///
/// Errors from earlier attempts are logged and dropped; only the last one is
/// returned.
///
/// # Example
/// ```ignore
/// let result = retry(&RetryPolicy::default(), "nuke_account", || async {
///     nuke_account(&input).await
/// })
/// .await;
/// ```
pub async fn retry<F, Fut, T, E>(policy: &RetryPolicy, operation_name: &str, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match f().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        operation = operation_name,
                        attempt, "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if attempt >= attempts {
                    warn!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "Operation failed on final attempt"
                    );
                    return Err(err);
                }

                warn!(
                    operation = operation_name,
                    attempt,
                    remaining = attempts - attempt,
                    error = %err,
                    "Operation failed, retrying"
                );

                if let Some(delay) = policy.delay {
                    sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}
