//! In-flight registry: at most one retrieval per distinct dedup key.
//!
//! [`InFlightSet::admit`] is an atomic insert-if-absent. The first request for
//! a key becomes the leader and receives an [`InFlightLease`]; later requests
//! for the same key become followers and receive an [`OutcomeWaiter`] on the
//! leader's outcome. Completing (or dropping) the lease removes the entry and
//! publishes one [`Completion`] to every waiter: the shared `Arc<FetchOutcome>`
//! plus the verified bytes, so followers with a destination of their own can
//! be served without another retrieval.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use crate::error::FailureKind;
use crate::locator::DedupKey;
use crate::types::{Destination, FetchOutcome};

type OutcomeSlot = Option<Completion>;

/// What a finished lease hands to its waiters
#[derive(Clone, Debug)]
pub struct Completion {
    /// The leader's outcome
    pub outcome: Arc<FetchOutcome>,
    /// Verified content, present when the leader retrieved it
    pub content: Option<Arc<Vec<u8>>>,
}

struct Entry {
    lease_id: u64,
    batch: u64,
    rx: watch::Receiver<OutcomeSlot>,
}

/// Shared registry of retrievals currently in progress
///
/// Cheap to clone; clones share the same registry. Managers that should
/// deduplicate against each other must be built with the same set.
#[derive(Clone, Default)]
pub struct InFlightSet {
    entries: Arc<Mutex<HashMap<DedupKey, Entry>>>,
    next_id: Arc<AtomicU64>,
}

/// Result of [`InFlightSet::admit`]
pub enum Admission {
    /// No retrieval was in flight; the caller must perform it
    Leader(InFlightLease),
    /// Another request is already retrieving this key
    Follower {
        /// Resolves to the leader's outcome
        waiter: OutcomeWaiter,
        /// Whether the leader belongs to the same batch as the caller
        same_batch: bool,
    },
}

impl InFlightSet {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a batch number, unique among users of this registry
    pub fn next_batch(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Join the retrieval in flight for `key`, or register a new one
    ///
    /// `locator` and `destination` describe the caller's request; a leader
    /// uses them for the outcome published if its lease is dropped unfinished.
    pub fn admit(
        &self,
        key: &DedupKey,
        batch: u64,
        locator: &str,
        destination: &Destination,
    ) -> Admission {
        let mut entries = self.lock();
        if let Some(entry) = entries.get(key) {
            return Admission::Follower {
                waiter: OutcomeWaiter {
                    rx: entry.rx.clone(),
                },
                same_batch: entry.batch == batch,
            };
        }

        let lease_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        entries.insert(
            key.clone(),
            Entry {
                lease_id,
                batch,
                rx: rx.clone(),
            },
        );
        drop(entries);

        tracing::trace!(key = %key, lease_id, "Registered in-flight retrieval");

        Admission::Leader(InFlightLease {
            set: self.clone(),
            key: key.clone(),
            lease_id,
            tx: Some(tx),
            rx,
            locator: locator.to_string(),
            destination: destination.clone(),
        })
    }

    /// Whether a retrieval for `key` is in flight
    pub fn contains(&self, key: &DedupKey) -> bool {
        self.lock().contains_key(key)
    }

    /// Number of retrievals in flight
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is in flight
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DedupKey, Entry>> {
        // Entries stay consistent even if a holder panicked: every mutation is a
        // single insert or remove.
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn finish(
        &self,
        key: &DedupKey,
        lease_id: u64,
        tx: &watch::Sender<OutcomeSlot>,
        completion: Completion,
    ) {
        let mut entries = self.lock();
        if entries.get(key).is_some_and(|e| e.lease_id == lease_id) {
            entries.remove(key);
        }
        // Publish under the lock so no follower can join a finished entry
        tx.send_replace(Some(completion));
    }
}

/// Exclusive right (and duty) to perform the retrieval for one key
pub struct InFlightLease {
    set: InFlightSet,
    key: DedupKey,
    lease_id: u64,
    tx: Option<watch::Sender<OutcomeSlot>>,
    rx: watch::Receiver<OutcomeSlot>,
    locator: String,
    destination: Destination,
}

impl InFlightLease {
    /// Dedup key this lease covers
    pub fn key(&self) -> &DedupKey {
        &self.key
    }

    /// A waiter on this lease's own outcome
    pub fn waiter(&self) -> OutcomeWaiter {
        OutcomeWaiter {
            rx: self.rx.clone(),
        }
    }

    /// Publish the outcome, release every waiter and remove the entry
    ///
    /// `content` is the verified content of a successful retrieval.
    pub fn complete(
        mut self,
        outcome: FetchOutcome,
        content: Option<Vec<u8>>,
    ) -> Arc<FetchOutcome> {
        let outcome = Arc::new(outcome);
        if let Some(tx) = self.tx.take() {
            let completion = Completion {
                outcome: Arc::clone(&outcome),
                content: content.map(Arc::new),
            };
            self.set.finish(&self.key, self.lease_id, &tx, completion);
        }
        outcome
    }
}

impl Drop for InFlightLease {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            tracing::warn!(key = %self.key, "In-flight retrieval abandoned before completion");
            let outcome = FetchOutcome::rejected(
                self.locator.clone(),
                self.destination.clone(),
                FailureKind::Cancelled,
                "retrieval abandoned before completion",
            );
            let completion = Completion {
                outcome: Arc::new(outcome),
                content: None,
            };
            self.set.finish(&self.key, self.lease_id, &tx, completion);
        }
    }
}

/// Resolves to the outcome published by a lease
pub struct OutcomeWaiter {
    rx: watch::Receiver<OutcomeSlot>,
}

impl OutcomeWaiter {
    /// Wait until the lease publishes its outcome
    ///
    /// Returns `None` only if the publishing side vanished without an outcome.
    pub async fn wait(mut self) -> Option<Completion> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(slot) => (*slot).clone(),
            Err(_) => None,
        }
    }
}
