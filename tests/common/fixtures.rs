//! Test fixtures: configurations, managers and event collection

use resource_dl::{Event, FetchConfig, FetchManager, RetryConfig, TransferError, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use super::transport::ScriptedTransport;

/// Config with millisecond backoff and no jitter
pub fn quick_config(max_attempts: u32, max_concurrency: usize) -> FetchConfig {
    FetchConfig {
        max_concurrency,
        retry: RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            jitter: false,
        },
        ..FetchConfig::default()
    }
}

/// A manager driving `transport`
pub fn manager_for(transport: &Arc<ScriptedTransport>) -> FetchManager {
    FetchManager::new(Arc::clone(transport) as Arc<dyn Transport>)
}

/// A retriable transport error
pub fn unavailable() -> Result<Vec<u8>, TransferError> {
    Err(TransferError::Status {
        code: 503,
        message: "Service Unavailable".to_string(),
    })
}

/// Drain every event already delivered to `rx`
pub fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
