//! Bounded exponential-backoff retry around remote calls
//!
//! **Algorithm:**
//! 1. Attempt operation
//! 2. If successful, return result
//! 3. If the error is retryable and attempts remain: log WARN, wait
//!    `base_delay × 2^(attempt-1)`, retry
//! 4. If the error is not retryable: return it immediately
//! 5. After the last attempt: return the last observed error
//!
//! No deduplication happens here; only wrap idempotent operations.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::config::PipelineTimings;

/// Classification of a failure for the retry wrapper
pub trait Retryable {
    /// True for timeouts, network failures and provider rate limiting
    fn is_retryable(&self) -> bool;
}

/// Message signatures that mark a failure as transient
const TRANSIENT_SIGNATURES: &[&str] = &[
    "timeout",
    "timed out",
    "network",
    "econnrefused",
    "econnreset",
    "connection refused",
    "connection reset",
    "connection closed",
    "rate limit",
    "too many requests",
    "service unavailable",
    "429",
    "503",
];

/// True if an error message carries a transient-failure signature
pub fn is_transient_message(message: &str) -> bool {
    let lowered = message.to_lowercase();
    TRANSIENT_SIGNATURES.iter().any(|sig| lowered.contains(sig))
}

/// Attempt budget and base delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(5000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_timings(timings: &PipelineTimings) -> Self {
        Self::new(timings.retry_max_attempts, timings.retry_base_delay)
    }

    /// Wait after failed attempt `attempt` (1-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Run `operation` under `policy`
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g., "start child job")
/// * `policy` - Attempt budget and base delay
/// * `operation` - Async closure performing one remote call
pub async fn invoke_with_retry<F, Fut, T, E>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        "Remote call succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                if !err.is_retryable() {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "Non-retryable failure, giving up"
                    );
                    return Err(err);
                }

                if attempt >= policy.max_attempts {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "Remote call failed: retry budget exhausted"
                    );
                    return Err(err);
                }

                let backoff = policy.backoff_delay(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Transient failure, will retry after backoff"
                );

                tokio::time::sleep(backoff).await;
            }
        }
    }
}
