//! Fetch manager: bounded-concurrency, deduplicated, retried retrieval of a
//! batch of resources.
//!
//! Split into focused submodules:
//! - [`state`] - Per-request state machine and its transition function
//! - [`task`] - Driver executing the state machine for one request
//! - [`context`] - Shared per-request state and outcome construction
//! - [`queue`] - Priority admission of leaders into concurrency slots
//! - [`follower`] - Outcomes of requests that joined another retrieval

mod context;
mod follower;
mod queue;
mod state;
mod task;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use futures::future::join_all;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Semaphore, broadcast};
use tokio_util::sync::CancellationToken;

use crate::config::FetchConfig;
use crate::error::{FailureKind, Result};
use crate::inflight::{Admission, InFlightLease, InFlightSet, OutcomeWaiter};
use crate::locator::Locator;
use crate::transport::{DefaultTransport, Transport};
use crate::types::{Destination, Event, FetchOutcome, FetchStatus, RequestId, ResourceRequest};

use context::RequestContext;
use queue::QueuedRequest;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Retrieves batches of resources through a [`Transport`]
///
/// Cheap to clone; clones share the transport, the in-flight registry and
/// the event channel.
#[derive(Clone)]
pub struct FetchManager {
    transport: Arc<dyn Transport>,
    in_flight: InFlightSet,
    event_tx: broadcast::Sender<Event>,
}

/// State shared by every request of one `submit` call
struct Batch {
    config: Arc<FetchConfig>,
    cancel: CancellationToken,
    slots: Arc<Semaphore>,
}

/// How the outcome for one batch position will be obtained
enum Slot {
    /// Known without any retrieval (validation failure)
    Ready(Arc<FetchOutcome>),
    /// This request performs the retrieval
    Leader {
        request: ResourceRequest,
        waiter: OutcomeWaiter,
    },
    /// Another request performs the retrieval
    Follower {
        id: RequestId,
        locator: Locator,
        request: ResourceRequest,
        waiter: OutcomeWaiter,
        same_batch: bool,
    },
}

impl FetchManager {
    /// Create a manager with its own in-flight registry
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_in_flight(transport, InFlightSet::new())
    }

    /// Create a manager that deduplicates against `in_flight`
    ///
    /// Managers sharing one registry never retrieve the same locator
    /// concurrently.
    pub fn with_in_flight(transport: Arc<dyn Transport>, in_flight: InFlightSet) -> Self {
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport,
            in_flight,
            event_tx,
        }
    }

    /// Create a manager using the scheme-routing [`DefaultTransport`]
    pub fn from_config(config: &FetchConfig) -> Result<Self> {
        let transport = DefaultTransport::new(&config.user_agent)?;
        Ok(Self::new(Arc::new(transport)))
    }

    /// The in-flight registry this manager deduplicates against
    pub fn in_flight(&self) -> &InFlightSet {
        &self.in_flight
    }

    /// Subscribe to progress events
    ///
    /// Multiple subscribers are supported; each receives every event sent
    /// after it subscribed.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Retrieve every request in `batch`
    ///
    /// Returns one outcome per request, in input order. Fails only if
    /// `config` is invalid; per-request failures are reported in the outcomes.
    pub async fn submit(
        &self,
        batch: Vec<ResourceRequest>,
        config: &FetchConfig,
    ) -> Result<Vec<Arc<FetchOutcome>>> {
        self.submit_with_cancel(batch, config, CancellationToken::new())
            .await
    }

    /// Like [`submit`](Self::submit), stopping early once `cancel` fires
    ///
    /// After cancellation no new attempts start; requests still pending or
    /// fetching complete as `Cancelled`. A destination write already under
    /// way is allowed to finish. Dropping the returned future cancels the
    /// batch as well.
    pub async fn submit_with_cancel(
        &self,
        requests: Vec<ResourceRequest>,
        config: &FetchConfig,
        cancel: CancellationToken,
    ) -> Result<Vec<Arc<FetchOutcome>>> {
        config.validate()?;

        let batch_id = self.in_flight.next_batch();
        let cancel = cancel.child_token();
        // Stops the dispatcher and every request task when this call ends
        let _guard = cancel.clone().drop_guard();
        let config = Arc::new(config.clone());

        if let Some(limit) = config.batch_timeout {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(limit) => {
                        tracing::warn!(batch = batch_id, timeout_ms = limit.as_millis() as u64, "Batch timeout elapsed, cancelling");
                        cancel.cancel();
                    }
                }
            });
        }

        tracing::info!(
            batch = batch_id,
            requests = requests.len(),
            max_concurrency = config.max_concurrency,
            "Submitting batch"
        );

        let batch = Batch {
            slots: Arc::new(Semaphore::new(config.max_concurrency)),
            config,
            cancel,
        };

        // Phase 1: validate and admit
        let mut pending = BinaryHeap::new();
        let mut slots = Vec::with_capacity(requests.len());
        for (index, request) in requests.into_iter().enumerate() {
            let id = RequestId {
                batch: batch_id,
                index,
            };
            let slot = self.admit(id, request, &batch, &mut pending);
            slots.push(slot);
        }

        // Phase 2: hand out concurrency slots
        tokio::spawn(queue::dispatch(
            pending,
            Arc::clone(&batch.slots),
            batch.cancel.clone(),
        ));

        // Phase 3: collect in input order
        let outcomes = join_all(slots.into_iter().map(|slot| self.resolve(slot, &batch))).await;

        let failed = outcomes.iter().filter(|o| !o.status.is_success()).count();
        tracing::info!(
            batch = batch_id,
            requests = outcomes.len(),
            failed,
            "Batch finished"
        );
        Ok(outcomes)
    }

    /// Validate one request and register it in the in-flight set
    fn admit(
        &self,
        id: RequestId,
        request: ResourceRequest,
        batch: &Batch,
        pending: &mut BinaryHeap<QueuedRequest>,
    ) -> Slot {
        let locator = match validate(&request) {
            Ok(locator) => locator,
            Err(reason) => {
                tracing::warn!(id = %id, locator = %request.locator, reason = %reason, "Rejecting invalid request");
                self.emit(Event::RequestFailed {
                    id,
                    locator: request.locator.clone(),
                    kind: FailureKind::Validation,
                    attempts: 0,
                    error: reason.clone(),
                });
                return Slot::Ready(Arc::new(FetchOutcome::rejected(
                    request.locator,
                    request.destination,
                    FailureKind::Validation,
                    reason,
                )));
            }
        };

        match self.in_flight.admit(
            locator.dedup_key(),
            id.batch,
            &request.locator,
            &request.destination,
        ) {
            Admission::Leader(lease) => {
                let slot = Slot::Leader {
                    request: request.clone(),
                    waiter: lease.waiter(),
                };
                pending.push(self.queued(id, locator, request, lease, batch));
                slot
            }
            Admission::Follower { waiter, same_batch } => {
                tracing::debug!(id = %id, key = %locator.dedup_key(), same_batch, "Joining in-flight retrieval");
                self.emit(Event::Deduplicated {
                    id,
                    key: locator.dedup_key().to_string(),
                });
                Slot::Follower {
                    id,
                    locator,
                    request,
                    waiter,
                    same_batch,
                }
            }
        }
    }

    /// Package a leader for the admission queue
    fn queued(
        &self,
        id: RequestId,
        locator: Locator,
        request: ResourceRequest,
        lease: InFlightLease,
        batch: &Batch,
    ) -> QueuedRequest {
        QueuedRequest {
            priority: request.priority,
            index: id.index,
            ctx: RequestContext {
                id,
                locator,
                request,
                transport: Arc::clone(&self.transport),
                event_tx: self.event_tx.clone(),
                config: Arc::clone(&batch.config),
                cancel: batch.cancel.clone(),
                admitted_at: Instant::now(),
            },
            lease,
        }
    }

    /// Wait for the outcome of one batch position
    async fn resolve(&self, slot: Slot, batch: &Batch) -> Arc<FetchOutcome> {
        match slot {
            Slot::Ready(outcome) => outcome,
            // The leader is driven by this batch and always publishes
            Slot::Leader { request, waiter } => match waiter.wait().await {
                Some(completion) => completion.outcome,
                None => Arc::new(orphaned(request)),
            },
            Slot::Follower {
                id,
                locator,
                request,
                waiter,
                same_batch,
            } => {
                self.follow(id, locator, request, waiter, same_batch, batch)
                    .await
            }
        }
    }

    /// Wait on the retrieval a follower joined, then derive its outcome
    ///
    /// A leader from another batch can be cancelled by its own caller. When
    /// that happens and this batch is still live, the request is admitted
    /// again: it either leads a fresh retrieval or joins the one now in flight.
    async fn follow(
        &self,
        id: RequestId,
        locator: Locator,
        request: ResourceRequest,
        mut waiter: OutcomeWaiter,
        mut same_batch: bool,
        batch: &Batch,
    ) -> Arc<FetchOutcome> {
        loop {
            let completion = if same_batch {
                // That leader shares this batch's cancellation
                waiter.wait().await
            } else {
                tokio::select! {
                    biased;
                    completion = waiter.wait() => completion,
                    _ = batch.cancel.cancelled() => return self.cancelled_follower(id, request),
                }
            };
            let Some(completion) = completion else {
                return Arc::new(orphaned(request));
            };

            let cancelled_elsewhere = !same_batch
                && completion.outcome.status == FetchStatus::Failed(FailureKind::Cancelled)
                && !batch.cancel.is_cancelled();
            if !cancelled_elsewhere {
                return self.adopt(id, request, completion).await;
            }

            tracing::info!(id = %id, key = %locator.dedup_key(), "Joined retrieval was cancelled by its caller, admitting again");
            match self.in_flight.admit(
                locator.dedup_key(),
                id.batch,
                &request.locator,
                &request.destination,
            ) {
                Admission::Leader(lease) => {
                    waiter = lease.waiter();
                    same_batch = true;
                    let mut pending = BinaryHeap::new();
                    pending.push(self.queued(id, locator.clone(), request.clone(), lease, batch));
                    queue::dispatch(pending, Arc::clone(&batch.slots), batch.cancel.clone()).await;
                }
                Admission::Follower {
                    waiter: joined,
                    same_batch: joined_same_batch,
                } => {
                    waiter = joined;
                    same_batch = joined_same_batch;
                }
            }
        }
    }

    fn cancelled_follower(&self, id: RequestId, request: ResourceRequest) -> Arc<FetchOutcome> {
        self.emit(Event::RequestFailed {
            id,
            locator: request.locator.clone(),
            kind: FailureKind::Cancelled,
            attempts: 0,
            error: "batch cancelled".to_string(),
        });
        Arc::new(FetchOutcome::rejected(
            request.locator,
            request.destination,
            FailureKind::Cancelled,
            "batch cancelled",
        ))
    }

    fn emit(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine
        self.event_tx.send(event).ok();
    }
}

fn orphaned(request: ResourceRequest) -> FetchOutcome {
    FetchOutcome::rejected(
        request.locator,
        request.destination,
        FailureKind::Cancelled,
        "retrieval vanished without an outcome",
    )
}

/// Check the request shape and normalize its locator
fn validate(request: &ResourceRequest) -> std::result::Result<Locator, String> {
    if let Destination::Path(path) = &request.destination {
        if path.as_os_str().is_empty() {
            return Err("destination path is empty".to_string());
        }
    }
    Locator::parse(&request.locator).map_err(|e| e.to_string())
}
