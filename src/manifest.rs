//! Batch manifests: a JSON array of requests.
//!
//! ```json
//! [
//!   {"locator": "https://example.com/a.json", "destination": "out/a.json"},
//!   {"locator": "/srv/b.bin", "destination": "out/b.bin",
//!    "checksum": "sha256:…", "priority": "high"}
//! ]
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::integrity::Checksum;
use crate::types::{Destination, Priority, ResourceRequest};

/// One manifest line
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestEntry {
    /// Source locator
    pub locator: String,
    /// Output file; omitted entries are kept in memory
    #[serde(default)]
    pub destination: Option<PathBuf>,
    /// Expected digest
    #[serde(default)]
    pub checksum: Option<Checksum>,
    /// Admission priority
    #[serde(default)]
    pub priority: Priority,
}

impl From<ManifestEntry> for ResourceRequest {
    fn from(entry: ManifestEntry) -> Self {
        ResourceRequest {
            locator: entry.locator,
            destination: entry
                .destination
                .map_or(Destination::Buffer, Destination::Path),
            checksum: entry.checksum,
            priority: entry.priority,
        }
    }
}

/// Parse manifest text
///
/// `path` is only used for error messages.
pub fn parse_manifest(path: &Path, raw: &str) -> Result<Vec<ResourceRequest>> {
    let entries: Vec<ManifestEntry> = serde_json::from_str(raw).map_err(|e| Error::Manifest {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(entries.into_iter().map(ResourceRequest::from).collect())
}

/// Read and parse a manifest file
pub async fn load_manifest(path: &Path) -> Result<Vec<ResourceRequest>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::Manifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    let requests = parse_manifest(path, &raw)?;
    tracing::debug!(path = %path.display(), requests = requests.len(), "Loaded manifest");
    Ok(requests)
}
