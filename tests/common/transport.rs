//! Scripted transport that records how it was driven

use async_trait::async_trait;
use resource_dl::locator::Locator;
use resource_dl::{FileTransport, TransferError, Transport, WriteError};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

type Reply = Result<Vec<u8>, TransferError>;

/// Transport whose replies are scripted per locator
///
/// Unscripted fetches (and fetches past the end of a script) succeed with the
/// locator text as content. Every fetch first sleeps for the configured hold
/// time. Writes go to the real filesystem through [`FileTransport`].
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    hold: Duration,
    calls: Mutex<HashMap<String, usize>>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    started: watch::Sender<usize>,
    files: FileTransport,
}

/// Decrements the active count even when the fetch future is dropped
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedTransport {
    /// Transport answering immediately
    pub fn new() -> Self {
        Self::holding(Duration::ZERO)
    }

    /// Transport that keeps every fetch busy for `hold`
    pub fn holding(hold: Duration) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            hold,
            calls: Mutex::new(HashMap::new()),
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            started: watch::channel(0).0,
            files: FileTransport::new(),
        }
    }

    /// Queue replies for `locator`
    pub fn script(self, locator: &str, replies: Vec<Reply>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(locator.to_string())
            .or_default()
            .extend(replies);
        self
    }

    /// Fetches issued for `locator`
    pub fn calls(&self, locator: &str) -> usize {
        self.calls.lock().unwrap().get(locator).copied().unwrap_or(0)
    }

    /// Fetches issued in total
    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Highest number of simultaneously running fetches observed
    pub fn peak_active(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Resolve once at least `n` fetches have started
    pub async fn wait_for_started(&self, n: usize) {
        let mut rx = self.started.subscribe();
        rx.wait_for(|started| *started >= n).await.unwrap();
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch(&self, locator: &Locator, _timeout: Duration) -> Reply {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(locator.as_str().to_string())
            .or_insert(0) += 1;

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = ActiveGuard(Arc::clone(&self.active));
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.started.send_modify(|started| *started += 1);

        if !self.hold.is_zero() {
            tokio::time::sleep(self.hold).await;
        }

        let reply = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(locator.as_str())
            .and_then(VecDeque::pop_front);
        reply.unwrap_or_else(|| Ok(locator.as_str().as_bytes().to_vec()))
    }

    async fn write(&self, destination: &Path, bytes: &[u8]) -> Result<(), WriteError> {
        self.files.write(destination, bytes).await
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
