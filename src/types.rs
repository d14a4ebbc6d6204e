//! Core types for resource-dl: requests, outcomes and events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::FailureKind;
use crate::integrity::Checksum;

/// Identifies one request: the batch it was submitted in and its position
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId {
    /// Batch sequence number, unique per manager
    pub batch: u64,
    /// Position of the request in its batch
    pub index: usize,
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.batch, self.index)
    }
}

/// Request priority; higher priorities are admitted first
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Low priority (-1)
    Low = -1,
    /// Normal priority (0)
    #[default]
    Normal = 0,
    /// High priority (1)
    High = 1,
}

/// Where retrieved bytes go
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    /// Write to a local file
    Path(PathBuf),
    /// Keep in memory and hand back in [`FetchOutcome::content`]
    Buffer,
}

impl Destination {
    /// File path, if this is a file destination
    pub fn as_path(&self) -> Option<&std::path::Path> {
        match self {
            Destination::Path(path) => Some(path),
            Destination::Buffer => None,
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Path(path) => write!(f, "{}", path.display()),
            Destination::Buffer => f.write_str("<buffer>"),
        }
    }
}

/// One desired retrieval
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// Source locator (URL or path)
    pub locator: String,
    /// Where the content goes
    pub destination: Destination,
    /// Expected content digest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,
    /// Admission order hint
    #[serde(default)]
    pub priority: Priority,
}

impl ResourceRequest {
    /// Request `locator` into a file
    pub fn to_path(locator: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            locator: locator.into(),
            destination: Destination::Path(path.into()),
            checksum: None,
            priority: Priority::Normal,
        }
    }

    /// Request `locator` into memory
    pub fn to_buffer(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            destination: Destination::Buffer,
            checksum: None,
            priority: Priority::Normal,
        }
    }

    /// Attach an integrity hint
    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    /// Set the admission priority
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Final status of a request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "kind", rename_all = "snake_case")]
pub enum FetchStatus {
    /// Retrieved, verified and written
    Succeeded,
    /// Ended without a usable artifact
    Failed(FailureKind),
    /// Destination already held content matching the integrity hint
    SkippedDuplicate,
}

impl FetchStatus {
    /// Whether the destination holds the requested content
    pub fn is_success(&self) -> bool {
        matches!(self, FetchStatus::Succeeded | FetchStatus::SkippedDuplicate)
    }

    /// Failure kind, if failed
    pub fn failure(&self) -> Option<FailureKind> {
        match self {
            FetchStatus::Failed(kind) => Some(*kind),
            _ => None,
        }
    }
}

/// Result of processing one [`ResourceRequest`]
///
/// Never mutated once built. Deduplicated requests share one instance
/// through `Arc`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Locator as submitted by the request that performed the work
    pub locator: String,
    /// Destination that was (or would have been) written
    pub destination: Destination,
    /// Final status
    pub status: FetchStatus,
    /// Number of attempts made (0 if never attempted)
    pub attempts: u32,
    /// Message of the last error, if any
    pub last_error: Option<String>,
    /// Time from admission to completion
    pub elapsed: Duration,
    /// Number of bytes retrieved on success
    pub bytes: Option<u64>,
    /// Retrieved content, for [`Destination::Buffer`] requests
    pub content: Option<Vec<u8>>,
    /// Wall-clock completion time
    pub finished_at: DateTime<Utc>,
}

impl FetchOutcome {
    /// Outcome for a request that never reached the transport
    pub(crate) fn rejected(
        locator: impl Into<String>,
        destination: Destination,
        kind: FailureKind,
        error: impl Into<String>,
    ) -> Self {
        Self {
            locator: locator.into(),
            destination,
            status: FetchStatus::Failed(kind),
            attempts: 0,
            last_error: Some(error.into()),
            elapsed: Duration::ZERO,
            bytes: None,
            content: None,
            finished_at: Utc::now(),
        }
    }
}

/// Event emitted during request processing
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The request will be satisfied by another in-flight retrieval
    Deduplicated {
        /// Request ID
        id: RequestId,
        /// Shared dedup key
        key: String,
    },

    /// Destination already matched the integrity hint; nothing fetched
    Skipped {
        /// Request ID
        id: RequestId,
        /// Request locator
        locator: String,
    },

    /// An attempt began
    AttemptStarted {
        /// Request ID
        id: RequestId,
        /// Request locator
        locator: String,
        /// Attempt number, starting at 1
        attempt: u32,
    },

    /// An attempt failed
    AttemptFailed {
        /// Request ID
        id: RequestId,
        /// Request locator
        locator: String,
        /// Attempt number, starting at 1
        attempt: u32,
        /// Error message
        error: String,
        /// Delay before the next attempt, if one is scheduled
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_in_ms: Option<u64>,
    },

    /// The request finished successfully
    RequestSucceeded {
        /// Request ID
        id: RequestId,
        /// Request locator
        locator: String,
        /// Attempts used
        attempts: u32,
        /// Bytes retrieved
        bytes: u64,
        /// Time from admission to completion in milliseconds
        elapsed_ms: u64,
    },

    /// The request reached a terminal failure
    RequestFailed {
        /// Request ID
        id: RequestId,
        /// Request locator
        locator: String,
        /// Failure taxonomy
        kind: FailureKind,
        /// Attempts used
        attempts: u32,
        /// Error message
        error: String,
    },
}

impl Event {
    /// The request this event concerns
    pub fn id(&self) -> RequestId {
        match self {
            Event::Deduplicated { id, .. }
            | Event::Skipped { id, .. }
            | Event::AttemptStarted { id, .. }
            | Event::AttemptFailed { id, .. }
            | Event::RequestSucceeded { id, .. }
            | Event::RequestFailed { id, .. } => *id,
        }
    }
}
