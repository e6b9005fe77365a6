//! Bounded retry for tool calls

use crate::error::{MCPError, Result};
use crate::outcome::{CallOutcome, FailureKind};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy: up to `max_attempts` tries, linear backoff of
/// `base_delay * attempt` between them
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy; `max_attempts` of zero is treated as one
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Attempt bound
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the attempt following `attempt`
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Run `attempt` until it succeeds, fails terminally, or the bound is hit
    ///
    /// `attempt` receives the 1-based attempt number. The outcome of the last
    /// attempt made is returned.
    ///
    /// # Errors
    /// Returns [`MCPError::RateLimited`] as soon as an attempt fails with a
    /// throttling error; rate limits are never retried
    pub async fn run<F, Fut>(&self, tool: &str, mut attempt: F) -> Result<CallOutcome>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = CallOutcome>,
    {
        let mut number = 1;
        loop {
            let outcome = attempt(number).await;

            let error = match &outcome {
                CallOutcome::Success { .. } => {
                    debug!(tool, attempt = number, "Tool call succeeded");
                    return Ok(outcome);
                }
                CallOutcome::Failure { error } => error,
            };

            if error.kind == FailureKind::RateLimited {
                warn!(tool, attempt = number, "Tool server is rate limiting: {}", error.message);
                return Err(MCPError::RateLimited {
                    tool: tool.into(),
                    message: error.message.clone(),
                });
            }

            if !error.is_retryable() {
                debug!(
                    tool,
                    attempt = number,
                    kind = ?error.kind,
                    "Non-retryable failure: {}",
                    error.message
                );
                return Ok(outcome);
            }

            if number >= self.max_attempts {
                warn!(
                    tool,
                    attempts = number,
                    "Giving up after {} attempt(s): {}",
                    number,
                    error.message
                );
                return Ok(outcome);
            }

            let delay = self.delay_after(number);
            warn!(
                tool,
                attempt = number,
                "Retryable failure, retrying in {:?}: {}",
                delay,
                error.message
            );
            tokio::time::sleep(delay).await;
            number += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}
