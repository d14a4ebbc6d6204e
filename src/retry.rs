//! Retry classification and exponential backoff
//!
//! [`IsRetryable`] splits transport errors into transient and permanent ones.
//! [`Backoff`] produces the delay sequence between attempts: exponential
//! growth from `initial_delay`, capped at `max_delay`, with optional jitter to
//! prevent thundering herd. The retry loop itself lives in the manager's
//! per-request state machine.

use crate::config::RetryConfig;
use crate::error::{TransferError, WriteError};
use rand::Rng;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, connection resets, server busy) should return `true`.
/// Permanent failures (not found, access denied, unsupported scheme) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for TransferError {
    fn is_retryable(&self) -> bool {
        match self {
            TransferError::Timeout { .. } => true,
            TransferError::Connection(_) => true,
            // Request timeout, too many requests, and every server-side error
            TransferError::Status { code, .. } => {
                matches!(code, 408 | 425 | 429) || (500..600).contains(code)
            }
            TransferError::NotFound(_) => false,
            TransferError::Denied(_) => false,
            TransferError::UnsupportedScheme(_) => false,
            // Unknown errors - be conservative and don't retry
            TransferError::Other(_) => false,
        }
    }
}

impl IsRetryable for WriteError {
    fn is_retryable(&self) -> bool {
        matches!(self, WriteError::Transient { .. })
    }
}

/// Delay generator for successive retries of one request
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: bool,
}

impl Backoff {
    /// Start a fresh delay sequence
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            next: config.initial_delay.min(config.max_delay),
            max_delay: config.max_delay,
            multiplier: config.backoff_multiplier.max(1.0),
            jitter: config.jitter,
        }
    }

    /// Delay to wait before the next retry; advances the sequence
    ///
    /// The result never exceeds `max_delay`, jitter included.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.next;
        let grown = Duration::from_secs_f64(
            (base.as_secs_f64() * self.multiplier).min(self.max_delay.as_secs_f64()),
        );
        self.next = grown.min(self.max_delay);

        let delay = if self.jitter { add_jitter(base) } else { base };
        delay.min(self.max_delay)
    }
}

/// Stretch `delay` by a random factor in `[1, 2]`
///
/// Spreads out retries of requests that failed together.
fn add_jitter(delay: Duration) -> Duration {
    delay.mul_f64(1.0 + rand::thread_rng().r#gen::<f64>())
}
