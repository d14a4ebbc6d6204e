//! Request task context: everything one admitted request needs to run.

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::FetchConfig;
use crate::error::FailureKind;
use crate::locator::Locator;
use crate::transport::Transport;
use crate::types::{Destination, Event, FetchOutcome, FetchStatus, RequestId, ResourceRequest};

use super::state::RequestState;

/// State shared by the driver of a single request
pub(crate) struct RequestContext {
    pub(crate) id: RequestId,
    pub(crate) locator: Locator,
    pub(crate) request: ResourceRequest,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) config: Arc<FetchConfig>,
    pub(crate) cancel: CancellationToken,
    /// When the request entered the in-flight registry
    pub(crate) admitted_at: Instant,
}

impl RequestContext {
    /// Send an event; having no subscribers is fine
    pub(crate) fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Whether the destination already holds content matching the integrity hint
    pub(crate) async fn destination_verified(&self) -> bool {
        if !self.config.skip_verified_existing {
            return false;
        }
        match (&self.request.checksum, &self.request.destination) {
            (Some(checksum), Destination::Path(path)) => checksum.matches_file(path).await,
            _ => false,
        }
    }

    /// Build the outcome for a terminal state and emit the matching event
    ///
    /// Also returns the verified content of a success, for followers whose
    /// destination differs from this request's.
    pub(crate) fn finish(&self, state: RequestState) -> (FetchOutcome, Option<Vec<u8>>) {
        let elapsed = self.admitted_at.elapsed();
        let locator = self.request.locator.clone();
        let destination = self.request.destination.clone();

        match state {
            RequestState::Skipped => {
                tracing::info!(id = %self.id, locator = %locator, "Destination already verified, skipping");
                self.emit(Event::Skipped {
                    id: self.id,
                    locator: locator.clone(),
                });
                let outcome = FetchOutcome {
                    locator,
                    destination,
                    status: FetchStatus::SkippedDuplicate,
                    attempts: 0,
                    last_error: None,
                    elapsed,
                    bytes: None,
                    content: None,
                    finished_at: Utc::now(),
                };
                (outcome, None)
            }
            RequestState::Succeeded {
                attempts,
                content,
                last_error,
            } => {
                let bytes = content.len() as u64;
                tracing::info!(
                    id = %self.id,
                    locator = %locator,
                    attempts,
                    bytes,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Request succeeded"
                );
                self.emit(Event::RequestSucceeded {
                    id: self.id,
                    locator: locator.clone(),
                    attempts,
                    bytes,
                    elapsed_ms: elapsed.as_millis() as u64,
                });
                let own = matches!(destination, Destination::Buffer).then(|| content.clone());
                let outcome = FetchOutcome {
                    locator,
                    destination,
                    status: FetchStatus::Succeeded,
                    attempts,
                    last_error,
                    elapsed,
                    bytes: Some(bytes),
                    content: own,
                    finished_at: Utc::now(),
                };
                (outcome, Some(content))
            }
            RequestState::PermanentlyFailed {
                attempts,
                kind,
                error,
            } => (self.failed(kind, attempts, error, elapsed), None),
            // The driver only calls this with terminal states
            other => {
                let outcome = self.failed(
                    FailureKind::Cancelled,
                    other.attempts(),
                    "request stopped before reaching a terminal state".to_string(),
                    elapsed,
                );
                (outcome, None)
            }
        }
    }

    fn failed(
        &self,
        kind: FailureKind,
        attempts: u32,
        error: String,
        elapsed: Duration,
    ) -> FetchOutcome {
        tracing::warn!(
            id = %self.id,
            locator = %self.request.locator,
            kind = %kind,
            attempts,
            error = %error,
            "Request failed"
        );
        self.emit(Event::RequestFailed {
            id: self.id,
            locator: self.request.locator.clone(),
            kind,
            attempts,
            error: error.clone(),
        });
        FetchOutcome {
            locator: self.request.locator.clone(),
            destination: self.request.destination.clone(),
            status: FetchStatus::Failed(kind),
            attempts,
            last_error: Some(error),
            elapsed,
            bytes: None,
            content: None,
            finished_at: Utc::now(),
        }
    }
}
