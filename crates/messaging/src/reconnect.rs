//! Bounded exponential backoff for broker connections.
//!
//! Gateways run at remote sites with flaky links; reconnection has to be
//! fully automatic. [`with_backoff`] retries an async connect operation
//! with exponentially growing delays up to a cap, giving up after a
//! configured number of attempts.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::MessagingError;

/// Retry schedule for [`with_backoff`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the second attempt.
    pub initial: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Total attempts before giving up.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

impl BackoffPolicy {
    /// Delay to sleep after the given zero-based failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let doubled = self
            .initial
            .checked_mul(2u32.saturating_pow(attempt))
            .unwrap_or(self.max_delay);
        doubled.min(self.max_delay)
    }
}

/// Run `op` until it succeeds or the policy is exhausted.
///
/// `op` is invoked fresh on every attempt; failures below the last attempt
/// are logged at warn level and followed by the policy's delay.
pub async fn with_backoff<T, F, Fut>(
    what: &str,
    policy: &BackoffPolicy,
    mut op: F,
) -> Result<T, MessagingError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MessagingError>>,
{
    let mut last_error = String::new();
    for attempt in 0..policy.max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                last_error = e.to_string();
                let delay = policy.delay_for(attempt);
                warn!(
                    what,
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "connection attempt failed, backing off"
                );
                if attempt + 1 < policy.max_attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(MessagingError::BackoffExhausted {
        attempts: policy.max_attempts,
        last_error,
    })
}
