//! # resource-dl
//!
//! Reliable retrieval of batches of remote or local resources.
//!
//! ## Design Philosophy
//!
//! resource-dl is designed to be:
//! - **Bounded** - At most `max_concurrency` retrievals run at once; the rest wait in order
//! - **Deduplicating** - Identical locators in flight are retrieved once and share one outcome
//! - **Resilient** - Transient failures are retried with exponential backoff
//! - **Verifiable** - Integrity hints are checked before anything is written
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use resource_dl::{FetchConfig, FetchManager, ResourceRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = FetchConfig::default();
//!     let manager = FetchManager::from_config(&config)?;
//!
//!     // Subscribe to events
//!     let mut events = manager.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let outcomes = manager
//!         .submit(
//!             vec![
//!                 ResourceRequest::to_path("https://example.com/a.json", "out/a.json"),
//!                 ResourceRequest::to_buffer("https://example.com/b.json"),
//!             ],
//!             &config,
//!         )
//!         .await?;
//!
//!     for outcome in outcomes {
//!         println!("{}: {:?}", outcome.locator, outcome.status);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// In-flight deduplication registry
pub mod inflight;
/// Integrity hints (checksums)
pub mod integrity;
/// Locator parsing and normalization
pub mod locator;
/// Batch retrieval manager
pub mod manager;
/// JSON batch manifests
pub mod manifest;
/// Batch summaries and exit codes
pub mod report;
/// Retry classification and backoff
pub mod retry;
/// Transport collaborators
pub mod transport;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{FetchConfig, RetryConfig};
pub use error::{Error, FailureKind, Result, TransferError, WriteError};
pub use inflight::InFlightSet;
pub use integrity::Checksum;
pub use locator::{DedupKey, Locator};
pub use manager::FetchManager;
pub use report::BatchSummary;
pub use retry::IsRetryable;
pub use transport::{DefaultTransport, FileTransport, HttpTransport, Transport};
pub use types::{
    Destination, Event, FetchOutcome, FetchStatus, Priority, RequestId, ResourceRequest,
};

use tokio_util::sync::CancellationToken;

/// Cancel `token` when the process receives a termination signal.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// The watcher task ends early if `token` is cancelled by other means.
///
/// # Example
///
/// ```no_run
/// use resource_dl::{FetchConfig, FetchManager, cancel_on_signal};
/// use tokio_util::sync::CancellationToken;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = FetchConfig::default();
///     let manager = FetchManager::from_config(&config)?;
///     let cancel = CancellationToken::new();
///     cancel_on_signal(cancel.clone());
///
///     let outcomes = manager.submit_with_cancel(Vec::new(), &config, cancel).await?;
///     assert!(outcomes.is_empty());
///     Ok(())
/// }
/// ```
pub fn cancel_on_signal(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = wait_for_signal() => {
                tracing::info!("Cancelling outstanding requests");
                token.cancel();
            }
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            // Never resolve: a broken listener must not cancel the batch
            std::future::pending::<()>().await;
        }
    }
}
