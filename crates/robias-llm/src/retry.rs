//! Retry with exponential backoff around a single model call.
//!
//! Every [`LlmError`] maps to a [`RetryPolicy`]. Transient failures (timeouts,
//! 429/5xx responses, malformed model output) are retried with a doubling
//! delay; anything else is returned immediately.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::backend::LlmError;

/// Whether an error condition is safe to retry and, if so, after what delay.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryPolicy {
    /// `after` is a server-supplied minimum delay (from `Retry-After`).
    /// `None` means apply the configured backoff schedule.
    Retryable { after: Option<Duration> },
    NonRetryable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one. Never less than 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    /// Delay before attempt `failed_attempt + 1`, where `failed_attempt` is 1-based.
    pub fn backoff_for(&self, failed_attempt: u32) -> Duration {
        let exp = failed_attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.max(1.0).powi(exp);
        let capped = secs.min(self.max_backoff.as_secs_f64());
        Duration::try_from_secs_f64(capped.max(0.0)).unwrap_or(self.max_backoff)
    }

    fn delay_for(&self, failed_attempt: u32, after: Option<Duration>) -> Duration {
        match after {
            Some(server) => server.min(self.max_backoff),
            None         => self.backoff_for(failed_attempt),
        }
    }
}

/// A successful value and the number of attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// The last error once retries are exhausted or the error was not retryable.
#[derive(Debug, Error)]
#[error("{source} (after {attempts} attempt(s))")]
pub struct RetryFailure {
    pub attempts: u32,
    #[source]
    pub source: LlmError,
}

/// Run `op` until it succeeds, fails with a non-retryable error, or
/// `config.max_attempts` is reached.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    label: &str,
    mut op: F,
) -> Result<Retried<T>, RetryFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(Retried { value, attempts: attempt }),
            Err(err) => {
                let after = match err.retry_policy() {
                    RetryPolicy::Retryable { after } if attempt < max_attempts => after,
                    _ => return Err(RetryFailure { attempts: attempt, source: err }),
                };
                let delay = config.delay_for(attempt, after);
                warn!(
                    call = label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient LLM failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
