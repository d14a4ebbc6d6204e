//! Shared test helpers for exercising the fetch manager without a network.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::{FetchConfig, RetryConfig};
use crate::error::{TransferError, WriteError};
use crate::inflight::{Admission, InFlightLease, InFlightSet};
use crate::locator::Locator;
use crate::transport::Transport;
use crate::types::{Destination, RequestId, ResourceRequest};

use super::context::RequestContext;

type FetchResult = Result<Vec<u8>, TransferError>;

/// Transport answering from per-locator scripts
///
/// Each fetch of a locator pops the next scripted result; once a script is
/// exhausted (or for unscripted locators) the fetch returns the locator
/// string as content. Writes are recorded in memory.
#[derive(Default)]
pub(crate) struct MockTransport {
    scripts: Mutex<HashMap<String, VecDeque<FetchResult>>>,
    write_failures: Mutex<VecDeque<WriteError>>,
    delay: Duration,
    fetches: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    order: Mutex<Vec<String>>,
    written: Mutex<HashMap<PathBuf, Vec<u8>>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every fetch sleeps for `delay` before answering
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Queue results for `locator`
    pub(crate) fn script(&self, locator: &str, results: Vec<FetchResult>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(locator.to_string())
            .or_default()
            .extend(results);
    }

    /// Make the next write fail with `error`
    pub(crate) fn fail_next_write(&self, error: WriteError) {
        self.write_failures.lock().unwrap().push_back(error);
    }

    pub(crate) fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Locators in the order their first fetch started
    pub(crate) fn fetch_order(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }

    pub(crate) fn written(&self, path: &Path) -> Option<Vec<u8>> {
        self.written.lock().unwrap().get(path).cloned()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch(&self, locator: &Locator, _timeout: Duration) -> FetchResult {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        {
            let mut order = self.order.lock().unwrap();
            if !order.iter().any(|l| l == locator.as_str()) {
                order.push(locator.as_str().to_string());
            }
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(locator.as_str())
            .and_then(VecDeque::pop_front);
        self.active.fetch_sub(1, Ordering::SeqCst);

        scripted.unwrap_or_else(|| Ok(locator.as_str().as_bytes().to_vec()))
    }

    async fn write(&self, destination: &Path, bytes: &[u8]) -> Result<(), WriteError> {
        if let Some(err) = self.write_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.written
            .lock()
            .unwrap()
            .insert(destination.to_path_buf(), bytes.to_vec());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Configuration with fast, deterministic retries
pub(crate) fn fast_config(max_attempts: u32) -> FetchConfig {
    FetchConfig {
        retry: RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: false,
        },
        ..FetchConfig::default()
    }
}

/// A context for `locator` backed by a fresh [`MockTransport`]
pub(crate) fn context_for(locator: &str, index: usize) -> RequestContext {
    let (event_tx, _rx) = tokio::sync::broadcast::channel(16);
    RequestContext {
        id: RequestId { batch: 0, index },
        locator: Locator::parse(locator).unwrap(),
        request: ResourceRequest::to_buffer(locator),
        transport: Arc::new(MockTransport::new()),
        event_tx,
        config: Arc::new(fast_config(3)),
        cancel: CancellationToken::new(),
        admitted_at: Instant::now(),
    }
}

/// A leader lease for `locator` in a private registry
pub(crate) fn lease_for(locator: &str) -> InFlightLease {
    let set = InFlightSet::new();
    let key = Locator::parse(locator).unwrap().dedup_key().clone();
    match set.admit(&key, 0, locator, &Destination::Buffer) {
        Admission::Leader(lease) => lease,
        Admission::Follower { .. } => unreachable!("fresh registry has no entries"),
    }
}
