//! Local filesystem transport.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use super::{Transport, write_atomically};
use crate::error::{TransferError, WriteError};
use crate::locator::{Locator, Target};

/// Reads `file:` URLs and bare paths; writes destinations atomically
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTransport;

impl FileTransport {
    /// Create a filesystem transport
    pub fn new() -> Self {
        Self
    }
}

fn classify_read_error(path: &Path, err: &std::io::Error) -> TransferError {
    let shown = path.display().to_string();
    match err.kind() {
        std::io::ErrorKind::NotFound => TransferError::NotFound(shown),
        std::io::ErrorKind::PermissionDenied => TransferError::Denied(shown),
        std::io::ErrorKind::TimedOut
        | std::io::ErrorKind::Interrupted
        | std::io::ErrorKind::WouldBlock => TransferError::Connection(format!("{shown}: {err}")),
        _ => TransferError::Other(format!("{shown}: {err}")),
    }
}

#[async_trait]
impl Transport for FileTransport {
    async fn fetch(
        &self,
        locator: &Locator,
        _timeout: Duration,
    ) -> std::result::Result<Vec<u8>, TransferError> {
        let Target::Path(path) = locator.target() else {
            return Err(TransferError::UnsupportedScheme(
                locator.scheme().to_string(),
            ));
        };

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| classify_read_error(path, &e))?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "Read local resource");
        Ok(bytes)
    }

    async fn write(
        &self,
        destination: &Path,
        bytes: &[u8],
    ) -> std::result::Result<(), WriteError> {
        write_atomically(destination, bytes).await
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
