//! Admission queue: hands concurrency slots to leaders in priority order.

use std::collections::BinaryHeap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::inflight::InFlightLease;
use crate::types::Priority;

use super::context::RequestContext;
use super::task::run_request;

/// A leader waiting for a concurrency slot
pub(crate) struct QueuedRequest {
    pub(crate) priority: Priority,
    /// Position in the batch, for FIFO tie-breaking
    pub(crate) index: usize,
    pub(crate) ctx: RequestContext,
    pub(crate) lease: InFlightLease,
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.index == other.index
    }
}

impl Eq for QueuedRequest {}

// BinaryHeap is a max-heap
impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match self.priority.cmp(&other.priority) {
            // Equal priorities: earlier submissions come first
            std::cmp::Ordering::Equal => other.index.cmp(&self.index),
            ordering => ordering,
        }
    }
}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Start every queued request as slots become available
///
/// The semaphore is fair, so slots are granted in the order this loop asks
/// for them. After cancellation the remaining requests are completed as
/// `Cancelled` in place without waiting for a slot.
pub(crate) async fn dispatch(
    mut queue: BinaryHeap<QueuedRequest>,
    slots: Arc<Semaphore>,
    cancel: CancellationToken,
) {
    while let Some(queued) = queue.pop() {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = Arc::clone(&slots).acquire_owned() => permit.ok(),
        };

        match permit {
            Some(permit) => {
                tokio::spawn(async move {
                    let _permit = permit;
                    run_request(queued.ctx, queued.lease).await;
                });
            }
            None => {
                tracing::debug!(id = %queued.ctx.id, "Batch cancelled before a slot was granted");
                run_request(queued.ctx, queued.lease).await;
            }
        }
    }
}
