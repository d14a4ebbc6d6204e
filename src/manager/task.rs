//! Request task driver: executes the effect of each [`RequestState`] and
//! feeds the result back into the state machine until a terminal state.

use crate::error::TransferError;
use crate::inflight::InFlightLease;
use crate::retry::Backoff;
use crate::types::{Destination, Event};

use super::context::RequestContext;
use super::state::{AttemptError, RequestState, RetryPolicy, Step};

/// Run one admitted request to completion and publish its outcome
///
/// The caller holds the concurrency slot for the duration of this call. If the
/// batch is already cancelled the request completes as `Cancelled` without
/// touching the transport.
pub(crate) async fn run_request(ctx: RequestContext, lease: InFlightLease) {
    let mut policy = RetryPolicy {
        max_attempts: ctx.config.retry.max_attempts,
        backoff: Backoff::new(&ctx.config.retry),
    };
    let mut state = RequestState::Admitted;

    while !state.is_terminal() {
        let step = next_step(&ctx, &state).await;
        let failed_attempt = match &step {
            Step::AttemptFinished(Err(err)) => Some(err.to_string()),
            _ => None,
        };

        state = state.transition(step, &mut policy);

        if let Some(error) = failed_attempt {
            report_failed_attempt(&ctx, &state, error);
        }
    }

    let (outcome, content) = ctx.finish(state);
    lease.complete(outcome, content);
}

/// Perform the effect `state` asks for
async fn next_step(ctx: &RequestContext, state: &RequestState) -> Step {
    if ctx.cancel.is_cancelled() {
        return Step::Cancelled;
    }

    match state {
        RequestState::Admitted => Step::Checked {
            verified: ctx.destination_verified().await,
        },
        RequestState::Attempting { attempt, .. } => {
            tracing::debug!(
                id = %ctx.id,
                locator = %ctx.locator,
                transport = ctx.transport.name(),
                attempt,
                "Starting attempt"
            );
            ctx.emit(Event::AttemptStarted {
                id: ctx.id,
                locator: ctx.request.locator.clone(),
                attempt: *attempt,
            });
            attempt_once(ctx).await
        }
        RequestState::RetryScheduled { delay, .. } => {
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => Step::Cancelled,
                _ = tokio::time::sleep(*delay) => Step::DelayElapsed,
            }
        }
        // Terminal states never reach the driver loop
        _ => Step::Cancelled,
    }
}

/// Fetch, verify and write once
///
/// Only the fetch is interruptible. Once verified content is being written the
/// write runs to completion even if the batch is cancelled meanwhile.
async fn attempt_once(ctx: &RequestContext) -> Step {
    let timeout = ctx.config.attempt_timeout;
    let fetch = tokio::time::timeout(timeout, ctx.transport.fetch(&ctx.locator, timeout));

    let fetched = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Step::Cancelled,
        result = fetch => result,
    };

    let content = match fetched {
        Ok(Ok(content)) => content,
        Ok(Err(e)) => return Step::AttemptFinished(Err(AttemptError::Transfer(e))),
        Err(_elapsed) => {
            return Step::AttemptFinished(Err(AttemptError::Transfer(TransferError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            })));
        }
    };

    if let Some(checksum) = &ctx.request.checksum {
        if let Err(mismatch) = checksum.verify(&content) {
            return Step::AttemptFinished(Err(AttemptError::Integrity(mismatch)));
        }
    }

    if let Destination::Path(path) = &ctx.request.destination {
        if let Err(e) = ctx.transport.write(path, &content).await {
            return Step::AttemptFinished(Err(AttemptError::Write(e)));
        }
    }

    Step::AttemptFinished(Ok(content))
}

fn report_failed_attempt(ctx: &RequestContext, state: &RequestState, error: String) {
    let (attempt, retry_in) = match state {
        RequestState::RetryScheduled { attempt, delay, .. } => (*attempt, Some(*delay)),
        other => (other.attempts(), None),
    };

    match retry_in {
        Some(delay) => tracing::warn!(
            id = %ctx.id,
            locator = %ctx.locator,
            attempt,
            max_attempts = ctx.config.retry.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Attempt failed, retrying after backoff"
        ),
        None => tracing::debug!(
            id = %ctx.id,
            locator = %ctx.locator,
            attempt,
            error = %error,
            "Attempt failed, not retrying"
        ),
    }

    ctx.emit(Event::AttemptFailed {
        id: ctx.id,
        locator: ctx.request.locator.clone(),
        attempt,
        error,
        retry_in_ms: retry_in.map(|d| d.as_millis() as u64),
    });
}
