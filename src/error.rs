//! Error types for resource-dl
//!
//! This module provides error handling for the library:
//! - [`Error`] for crate-level operations (configuration, manifests, I/O)
//! - [`TransferError`] and [`WriteError`] raised by a [`Transport`](crate::transport::Transport)
//! - [`FailureKind`], the per-request failure taxonomy captured in a
//!   [`FetchOutcome`](crate::types::FetchOutcome)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for resource-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for resource-dl
///
/// Per-request failures never surface as this type; they are captured into the
/// request's outcome. `Error` covers everything around a batch: loading
/// configuration and manifests, building transports, and so on.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_concurrency")
        key: Option<String>,
    },

    /// Manifest file could not be read or is malformed
    #[error("invalid manifest {path}: {reason}")]
    Manifest {
        /// The manifest path
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Errors raised by a transport while fetching a locator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// The attempt did not finish within the per-attempt timeout
    #[error("attempt timed out after {timeout_ms} ms")]
    Timeout {
        /// The timeout that elapsed
        timeout_ms: u64,
    },

    /// Connection could not be established or was dropped mid-transfer
    #[error("connection error: {0}")]
    Connection(String),

    /// The remote explicitly reports the resource does not exist
    #[error("resource not found: {0}")]
    NotFound(String),

    /// The remote answered with a non-success status
    #[error("unexpected status {code}: {message}")]
    Status {
        /// Status code (HTTP or transport specific)
        code: u16,
        /// Reason or response excerpt
        message: String,
    },

    /// Access was refused
    #[error("access denied: {0}")]
    Denied(String),

    /// The locator uses a scheme no transport handles
    #[error("unsupported locator scheme: {0}")]
    UnsupportedScheme(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Errors raised by a transport while writing a destination
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    /// The destination path cannot be written (permissions, not a directory, ...)
    #[error("cannot write {path}: {reason}")]
    Rejected {
        /// Destination path
        path: PathBuf,
        /// Underlying reason
        reason: String,
    },

    /// Temporary I/O failure (interrupted, would block, storage busy)
    #[error("transient write failure on {path}: {reason}")]
    Transient {
        /// Destination path
        path: PathBuf,
        /// Underlying reason
        reason: String,
    },
}

impl WriteError {
    /// Classify an I/O error raised while writing `path`
    pub fn from_io(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        let path = path.into();
        let reason = err.to_string();
        match err.kind() {
            std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::TimedOut => WriteError::Transient { path, reason },
            _ => WriteError::Rejected { path, reason },
        }
    }
}

/// Why a request ended without a successful retrieval
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The request itself was malformed; never attempted
    Validation,
    /// Retriable failures persisted until the attempt cap was reached
    TransientFailureExhausted,
    /// The transport reported an error that will never succeed
    PermanentFailure,
    /// Retrieved content did not match the integrity hint
    Integrity,
    /// The batch was cancelled before the request finished
    Cancelled,
}

impl FailureKind {
    /// Get the machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            FailureKind::Validation => "validation_error",
            FailureKind::TransientFailureExhausted => "transient_failure_exhausted",
            FailureKind::PermanentFailure => "permanent_failure",
            FailureKind::Integrity => "integrity_error",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.error_code())
    }
}
