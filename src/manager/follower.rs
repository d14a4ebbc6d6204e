//! Followers: the outcome of a request that joined another request's retrieval.
//!
//! A follower never fetches. Once the leader succeeds, the follower takes the
//! verified content, checks its own integrity hint against it and writes its
//! own destination. A follower with the leader's destination receives the
//! leader's outcome instance.

use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

use crate::error::FailureKind;
use crate::inflight::Completion;
use crate::retry::IsRetryable;
use crate::types::{Destination, Event, FetchOutcome, FetchStatus, RequestId, ResourceRequest};

use super::FetchManager;

impl FetchManager {
    /// Derive the outcome of follower `id` from the leader's completion
    pub(super) async fn adopt(
        &self,
        id: RequestId,
        request: ResourceRequest,
        completion: Completion,
    ) -> Arc<FetchOutcome> {
        let leader = completion.outcome;
        let same_destination = request.destination == leader.destination;

        if !leader.status.is_success() {
            if same_destination {
                return leader;
            }
            return Arc::new(FetchOutcome {
                destination: request.destination,
                ..(*leader).clone()
            });
        }
        if same_destination && request.checksum.is_none() {
            return leader;
        }

        let started = Instant::now();
        let content = match completion.content {
            Some(content) => content,
            None => match stored_content(&leader).await {
                Ok(content) => content,
                Err(reason) => {
                    let kind = FailureKind::PermanentFailure;
                    return self.follower_failed(id, &request, &leader, kind, reason);
                }
            },
        };

        if let Some(checksum) = &request.checksum {
            if let Err(mismatch) = checksum.verify(&content) {
                return self.follower_failed(
                    id,
                    &request,
                    &leader,
                    FailureKind::Integrity,
                    mismatch.to_string(),
                );
            }
        }
        if same_destination {
            return leader;
        }

        // Verified content is written even if the batch is being cancelled
        if let Destination::Path(path) = &request.destination {
            if let Err(e) = self.transport.write(path, &content).await {
                let kind = if e.is_retryable() {
                    FailureKind::TransientFailureExhausted
                } else {
                    FailureKind::PermanentFailure
                };
                return self.follower_failed(id, &request, &leader, kind, e.to_string());
            }
        }

        let bytes = content.len() as u64;
        let elapsed = leader.elapsed + started.elapsed();
        tracing::debug!(
            id = %id,
            locator = %request.locator,
            destination = %request.destination,
            bytes,
            "Served from a shared retrieval"
        );
        self.emit(Event::RequestSucceeded {
            id,
            locator: request.locator.clone(),
            attempts: leader.attempts,
            bytes,
            elapsed_ms: elapsed.as_millis() as u64,
        });

        let content = matches!(request.destination, Destination::Buffer).then(|| content.to_vec());
        Arc::new(FetchOutcome {
            locator: leader.locator.clone(),
            destination: request.destination,
            status: FetchStatus::Succeeded,
            attempts: leader.attempts,
            last_error: leader.last_error.clone(),
            elapsed,
            bytes: Some(bytes),
            content,
            finished_at: Utc::now(),
        })
    }

    fn follower_failed(
        &self,
        id: RequestId,
        request: &ResourceRequest,
        leader: &FetchOutcome,
        kind: FailureKind,
        error: String,
    ) -> Arc<FetchOutcome> {
        tracing::warn!(
            id = %id,
            locator = %request.locator,
            destination = %request.destination,
            kind = %kind,
            error = %error,
            "Shared retrieval unusable for this request"
        );
        self.emit(Event::RequestFailed {
            id,
            locator: request.locator.clone(),
            kind,
            attempts: leader.attempts,
            error: error.clone(),
        });
        Arc::new(FetchOutcome {
            locator: leader.locator.clone(),
            destination: request.destination.clone(),
            status: FetchStatus::Failed(kind),
            attempts: leader.attempts,
            last_error: Some(error),
            elapsed: leader.elapsed,
            bytes: None,
            content: None,
            finished_at: Utc::now(),
        })
    }
}

/// Content a skipped leader found already in place at its destination
async fn stored_content(leader: &FetchOutcome) -> Result<Arc<Vec<u8>>, String> {
    let path = leader
        .destination
        .as_path()
        .ok_or_else(|| "shared retrieval kept no content".to_string())?;
    tokio::fs::read(path)
        .await
        .map(Arc::new)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))
}
