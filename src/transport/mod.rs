//! Transport collaborators: how bytes are fetched and destinations written.
//!
//! The manager only talks to the [`Transport`] trait. Implementations:
//! - [`HttpTransport`] - `http`/`https` locators via reqwest
//! - [`FileTransport`] - `file:` URLs and bare paths
//! - [`DefaultTransport`] - routes by scheme to the two above

mod file;
mod http;

pub use file::FileTransport;
pub use http::HttpTransport;

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TransferError, WriteError};
use crate::locator::Locator;

/// Trait for retrieving locators and writing destination artifacts
///
/// Both operations may fail with errors the manager classifies through
/// [`IsRetryable`](crate::retry::IsRetryable). The manager enforces the
/// per-attempt timeout itself; `timeout` is passed on so implementations can
/// configure their own clients accordingly.
///
/// # Examples
///
/// ```no_run
/// use async_trait::async_trait;
/// use resource_dl::error::{TransferError, WriteError};
/// use resource_dl::locator::Locator;
/// use resource_dl::transport::Transport;
/// use std::path::Path;
/// use std::time::Duration;
///
/// struct Static;
///
/// #[async_trait]
/// impl Transport for Static {
///     async fn fetch(&self, _: &Locator, _: Duration) -> Result<Vec<u8>, TransferError> {
///         Ok(b"fixed".to_vec())
///     }
///
///     async fn write(&self, _: &Path, _: &[u8]) -> Result<(), WriteError> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Retrieve the full content behind `locator`
    async fn fetch(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> std::result::Result<Vec<u8>, TransferError>;

    /// Store `bytes` at `destination`
    async fn write(
        &self,
        destination: &Path,
        bytes: &[u8],
    ) -> std::result::Result<(), WriteError>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str {
        "transport"
    }
}

/// Scheme-routing transport used when the caller supplies none
pub struct DefaultTransport {
    http: HttpTransport,
    file: FileTransport,
}

impl DefaultTransport {
    /// Build with an HTTP client sending `user_agent`
    pub fn new(user_agent: &str) -> Result<Self> {
        Ok(Self {
            http: HttpTransport::new(user_agent)?,
            file: FileTransport::new(),
        })
    }
}

#[async_trait]
impl Transport for DefaultTransport {
    async fn fetch(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> std::result::Result<Vec<u8>, TransferError> {
        match locator.scheme() {
            "http" | "https" => self.http.fetch(locator, timeout).await,
            "file" => self.file.fetch(locator, timeout).await,
            other => Err(TransferError::UnsupportedScheme(other.to_string())),
        }
    }

    async fn write(
        &self,
        destination: &Path,
        bytes: &[u8],
    ) -> std::result::Result<(), WriteError> {
        self.file.write(destination, bytes).await
    }

    fn name(&self) -> &'static str {
        "default"
    }
}

/// Write `bytes` to a hidden sibling of `destination`, then rename it into place
///
/// The sibling's name carries a random suffix, so concurrent writers of one
/// destination never share a temporary file; the last rename wins.
pub(crate) async fn write_atomically(
    destination: &Path,
    bytes: &[u8],
) -> std::result::Result<(), WriteError> {
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| WriteError::from_io(destination, &e))?;
    }

    let file_name = destination
        .file_name()
        .ok_or_else(|| WriteError::Rejected {
            path: destination.to_path_buf(),
            reason: "destination has no file name".to_string(),
        })?
        .to_string_lossy();
    let temp_path =
        destination.with_file_name(format!(".{file_name}.{:016x}.part", rand::random::<u64>()));

    if let Err(e) = tokio::fs::write(&temp_path, bytes).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(WriteError::from_io(destination, &e));
    }
    if let Err(e) = tokio::fs::rename(&temp_path, destination).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(WriteError::from_io(destination, &e));
    }

    tracing::debug!(path = %destination.display(), bytes = bytes.len(), "Wrote destination");
    Ok(())
}
