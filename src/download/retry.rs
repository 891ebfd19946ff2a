//! Retry with linear backoff for probes and segment requests.
//!
//! The [`RetryPolicy`] grants an operation `max_retries` retries on top of the
//! initial attempt. Before every attempt, including the first, it waits
//! `(max_retries - attempts_remaining) * backoff_interval`: no delay up front,
//! then one more interval for each retry already spent.
//!
//! Which failures are worth a retry is decided by the caller. Probes retry only
//! timeouts; segment requests retry every [`FailureType::Transient`] failure
//! (see [`classify_error`]). Anything else is returned immediately without
//! touching the budget.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use multidownloader_core::download::RetryPolicy;
//!
//! let policy = RetryPolicy::new(3, Duration::from_secs(2));
//! assert_eq!(policy.delay_before_attempt(0), Duration::ZERO);
//! assert_eq!(policy.delay_before_attempt(2), Duration::from_secs(4));
//! ```

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::DownloadError;
use super::constants::{DEFAULT_BACKOFF_INTERVAL, DEFAULT_TIMEOUT_RETRIES};

/// Classification of download failure types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: timeout, connection reset, 5xx, 408, 429.
    Transient,

    /// Failure that won't succeed regardless of retries.
    ///
    /// Examples: 404, malformed headers, server ignoring ranges, disk errors.
    Permanent,

    /// Authentication or authorization required; retrying with the same
    /// credentials cannot help.
    NeedsAuth,
}

/// Mutable attempt bookkeeping for one [`RetryPolicy::run`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// Retries still available; the loop ends once this drops below zero.
    pub attempts_remaining: i64,
    /// Retries granted in total.
    pub max_attempts: u32,
    /// Delay increment per consumed retry.
    pub backoff_interval: Duration,
}

impl RetryState {
    fn delay(&self) -> Duration {
        let spent = i64::from(self.max_attempts) - self.attempts_remaining;
        self.backoff_interval * u32::try_from(spent.max(0)).unwrap_or(u32::MAX)
    }
}

/// Linear backoff retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries granted on top of the initial attempt.
    max_retries: u32,
    /// Added to the delay for every retry already spent.
    backoff_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_TIMEOUT_RETRIES,
            backoff_interval: DEFAULT_BACKOFF_INTERVAL,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with `max_retries` retries and a linear backoff step.
    #[must_use]
    pub fn new(max_retries: u32, backoff_interval: Duration) -> Self {
        Self {
            max_retries,
            backoff_interval,
        }
    }

    /// Retries granted on top of the initial attempt.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Backoff step.
    #[must_use]
    pub fn backoff_interval(&self) -> Duration {
        self.backoff_interval
    }

    /// Delay before attempt `attempt` (0-based; the first attempt waits nothing).
    #[must_use]
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        self.backoff_interval * attempt
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error, or
    /// the budget runs out.
    ///
    /// # Errors
    ///
    /// - the first error for which `is_retryable` returns false
    /// - [`DownloadError::RetriesExhausted`] once every retry has been spent
    /// - [`DownloadError::Cancelled`] when `cancel` fires during a backoff wait
    #[instrument(level = "debug", skip(self, cancel, is_retryable, operation), fields(max_retries = self.max_retries))]
    pub async fn run<T, F, Fut, P>(
        &self,
        url: &str,
        cancel: &CancellationToken,
        is_retryable: P,
        mut operation: F,
    ) -> Result<T, DownloadError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DownloadError>>,
        P: Fn(&DownloadError) -> bool,
    {
        let mut state = RetryState {
            attempts_remaining: i64::from(self.max_retries),
            max_attempts: self.max_retries,
            backoff_interval: self.backoff_interval,
        };
        let mut attempts = 0_u32;

        loop {
            let delay = state.delay();
            if !delay.is_zero() {
                debug!(delay_ms = delay.as_millis(), "backing off before next attempt");
                tokio::select! {
                    () = cancel.cancelled() => return Err(DownloadError::cancelled(url)),
                    () = tokio::time::sleep(delay) => {}
                }
            }

            attempts += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if is_retryable(&e) => {
                    state.attempts_remaining -= 1;
                    if state.attempts_remaining < 0 {
                        warn!(url, attempts, error = %e, "retry budget exhausted");
                        return Err(DownloadError::RetriesExhausted {
                            url: url.to_string(),
                            attempts,
                            last: Box::new(e),
                        });
                    }
                    info!(
                        url,
                        attempt = attempts,
                        remaining = state.attempts_remaining,
                        error = %e,
                        "attempt failed, retrying"
                    );
                }
                Err(e) => {
                    debug!(url, attempt = attempts, error = %e, "not retrying");
                    return Err(e);
                }
            }
        }
    }
}

/// Classifies a download error into a failure type for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | Timeout | Transient |
/// | Network (most) | Transient |
/// | Network (TLS) | Permanent |
/// | HTTP 408 / 429 / 5xx | Transient |
/// | HTTP 401 / 403 / 407 | NeedsAuth |
/// | Other HTTP statuses | Permanent |
/// | Everything else | Permanent |
#[instrument(level = "trace")]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::HttpStatus { status, .. } => classify_http_status(*status),
        DownloadError::AuthRequired { .. } => FailureType::NeedsAuth,
        DownloadError::Timeout { .. } => FailureType::Transient,
        DownloadError::Network { source, .. } => {
            if is_tls_error(source) {
                FailureType::Permanent
            } else {
                FailureType::Transient
            }
        }
        DownloadError::Ftp { .. } if error.is_timeout() => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureType {
    match status {
        401 | 403 | 407 => FailureType::NeedsAuth,
        408 => FailureType::Transient, // Request Timeout
        429 => FailureType::Transient, // Too Many Requests
        status if (500..600).contains(&status) => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

fn is_tls_error(error: &reqwest::Error) -> bool {
    let error_string = error.to_string().to_lowercase();
    error_string.contains("certificate")
        || error_string.contains("tls")
        || error_string.contains("ssl")
        || error_string.contains("handshake")
}

/// Retry predicate for probes: only timeouts are retried.
#[must_use]
pub fn retry_on_timeout(error: &DownloadError) -> bool {
    error.is_timeout()
}

/// Retry predicate for segment requests: every transient failure is retried.
#[must_use]
pub fn retry_on_transient(error: &DownloadError) -> bool {
    classify_error(error) == FailureType::Transient
}
