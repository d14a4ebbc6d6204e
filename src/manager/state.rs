//! Per-request state machine.
//!
//! ```text
//! Admitted ──► Skipped
//!    │
//!    ▼
//! Attempting ──► Succeeded
//!    │    ▲
//!    ▼    │
//! RetryScheduled
//!    │
//!    ▼
//! PermanentlyFailed
//! ```
//!
//! [`RequestState::transition`] is the only place that decides what happens
//! next. It performs no I/O; the driver in [`task`](super::task) executes the
//! effect each state asks for and feeds the result back as a [`Step`].

use std::time::Duration;

use crate::error::{FailureKind, TransferError, WriteError};
use crate::integrity::IntegrityMismatch;
use crate::retry::{Backoff, IsRetryable};

/// Why a single attempt failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AttemptError {
    Transfer(TransferError),
    Integrity(IntegrityMismatch),
    Write(WriteError),
}

impl AttemptError {
    /// Failure kind recorded when this error ends the request
    fn terminal_kind(&self, retryable: bool) -> FailureKind {
        match self {
            AttemptError::Integrity(_) => FailureKind::Integrity,
            _ if retryable => FailureKind::TransientFailureExhausted,
            _ => FailureKind::PermanentFailure,
        }
    }
}

impl IsRetryable for AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Transfer(e) => e.is_retryable(),
            AttemptError::Write(e) => e.is_retryable(),
            // Corrupt content is returned identically on every attempt
            AttemptError::Integrity(_) => false,
        }
    }
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::Transfer(e) => write!(f, "{e}"),
            AttemptError::Integrity(e) => write!(f, "{e}"),
            AttemptError::Write(e) => write!(f, "{e}"),
        }
    }
}

/// Input to [`RequestState::transition`]: the result of the effect the
/// previous state requested
#[derive(Debug)]
pub(crate) enum Step {
    /// Destination inspected; `verified` if it already holds the expected content
    Checked { verified: bool },
    /// An attempt ran to completion
    AttemptFinished(Result<Vec<u8>, AttemptError>),
    /// The backoff delay elapsed
    DelayElapsed,
    /// The batch was cancelled
    Cancelled,
}

/// Attempt cap plus the delay sequence for one request
pub(crate) struct RetryPolicy {
    pub(crate) max_attempts: u32,
    pub(crate) backoff: Backoff,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RequestState {
    /// Holds a concurrency slot, nothing attempted yet
    Admitted,
    /// Attempt number `attempt` (1-based) is running
    Attempting { attempt: u32, last_error: Option<String> },
    /// Attempt `attempt` failed with a retriable error; waiting `delay`
    RetryScheduled {
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// Destination already verified; no retrieval needed
    Skipped,
    /// Content retrieved, verified and written
    Succeeded {
        attempts: u32,
        content: Vec<u8>,
        last_error: Option<String>,
    },
    /// Terminal failure
    PermanentlyFailed {
        attempts: u32,
        kind: FailureKind,
        error: String,
    },
}

impl RequestState {
    /// Whether no further transition can occur
    pub(crate) fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Skipped
                | RequestState::Succeeded { .. }
                | RequestState::PermanentlyFailed { .. }
        )
    }

    /// Attempts started so far
    pub(crate) fn attempts(&self) -> u32 {
        match self {
            RequestState::Admitted | RequestState::Skipped => 0,
            RequestState::Attempting { attempt, .. }
            | RequestState::RetryScheduled { attempt, .. } => *attempt,
            RequestState::Succeeded { attempts, .. }
            | RequestState::PermanentlyFailed { attempts, .. } => *attempts,
        }
    }

    /// Compute the next state
    ///
    /// Terminal states absorb every step. A step that does not belong to the
    /// current state leaves it unchanged.
    pub(crate) fn transition(self, step: Step, policy: &mut RetryPolicy) -> RequestState {
        if self.is_terminal() {
            return self;
        }

        match (self, step) {
            (state, Step::Cancelled) => RequestState::PermanentlyFailed {
                attempts: state.attempts(),
                kind: FailureKind::Cancelled,
                error: "batch cancelled".to_string(),
            },

            (RequestState::Admitted, Step::Checked { verified: true }) => RequestState::Skipped,
            (RequestState::Admitted, Step::Checked { verified: false }) => {
                RequestState::Attempting {
                    attempt: 1,
                    last_error: None,
                }
            }

            (RequestState::Attempting { attempt, last_error }, Step::AttemptFinished(Ok(content))) => {
                RequestState::Succeeded {
                    attempts: attempt,
                    content,
                    last_error,
                }
            }
            (RequestState::Attempting { attempt, .. }, Step::AttemptFinished(Err(err))) => {
                let retryable = err.is_retryable();
                if retryable && attempt < policy.max_attempts {
                    RequestState::RetryScheduled {
                        attempt,
                        delay: policy.backoff.next_delay(),
                        error: err.to_string(),
                    }
                } else {
                    RequestState::PermanentlyFailed {
                        attempts: attempt,
                        kind: err.terminal_kind(retryable),
                        error: err.to_string(),
                    }
                }
            }

            (RequestState::RetryScheduled { attempt, error, .. }, Step::DelayElapsed) => {
                RequestState::Attempting {
                    attempt: attempt + 1,
                    last_error: Some(error),
                }
            }

            (state, _) => state,
        }
    }
}
