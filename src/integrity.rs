//! Integrity hints: expected content digests attached to a request.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::path::Path;
use thiserror::Error;

/// Supported digest algorithms
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    /// SHA-256 (64 hex characters)
    Sha256,
    /// SHA-512 (128 hex characters)
    Sha512,
}

impl ChecksumAlgorithm {
    fn prefix(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha512 => "sha512",
        }
    }

    fn hex_len(&self) -> usize {
        match self {
            ChecksumAlgorithm::Sha256 => 64,
            ChecksumAlgorithm::Sha512 => 128,
        }
    }

    /// Hex digest of `bytes`
    pub fn digest_hex(&self, bytes: &[u8]) -> String {
        match self {
            ChecksumAlgorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
            ChecksumAlgorithm::Sha512 => hex::encode(Sha512::digest(bytes)),
        }
    }
}

/// Checksum string could not be understood
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid checksum {value:?}: {reason}")]
pub struct ChecksumParseError {
    value: String,
    reason: &'static str,
}

/// Content did not hash to the expected digest
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("checksum mismatch: expected {expected}, got {actual}")]
pub struct IntegrityMismatch {
    /// Digest the request asked for
    pub expected: String,
    /// Digest of the retrieved content
    pub actual: String,
}

/// Expected digest of a resource
///
/// Written as `sha256:<hex>` / `sha512:<hex>`; a bare 64-character hex string
/// is read as SHA-256.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum {
    algorithm: ChecksumAlgorithm,
    digest: String,
}

impl Checksum {
    /// Parse a checksum string
    pub fn parse(value: &str) -> Result<Self, ChecksumParseError> {
        let value = value.trim();
        let (algorithm, digest) = match value.split_once(':') {
            Some((prefix, digest)) => {
                let algorithm = match prefix.to_ascii_lowercase().as_str() {
                    "sha256" => ChecksumAlgorithm::Sha256,
                    "sha512" => ChecksumAlgorithm::Sha512,
                    _ => {
                        return Err(ChecksumParseError {
                            value: value.to_string(),
                            reason: "unsupported algorithm",
                        });
                    }
                };
                (algorithm, digest)
            }
            None => (ChecksumAlgorithm::Sha256, value),
        };

        if digest.len() != algorithm.hex_len() {
            return Err(ChecksumParseError {
                value: value.to_string(),
                reason: "wrong digest length",
            });
        }
        if !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ChecksumParseError {
                value: value.to_string(),
                reason: "digest is not hexadecimal",
            });
        }

        Ok(Self {
            algorithm,
            digest: digest.to_ascii_lowercase(),
        })
    }

    /// Build the SHA-256 checksum of `bytes`
    pub fn sha256_of(bytes: &[u8]) -> Self {
        Self {
            algorithm: ChecksumAlgorithm::Sha256,
            digest: ChecksumAlgorithm::Sha256.digest_hex(bytes),
        }
    }

    /// Digest algorithm
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Lowercase hex digest
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Check `bytes` against the expected digest
    pub fn verify(&self, bytes: &[u8]) -> Result<(), IntegrityMismatch> {
        let actual = self.algorithm.digest_hex(bytes);
        if actual == self.digest {
            Ok(())
        } else {
            Err(IntegrityMismatch {
                expected: self.to_string(),
                actual: format!("{}:{}", self.algorithm.prefix(), actual),
            })
        }
    }

    /// Whether the file at `path` already holds matching content
    ///
    /// Missing or unreadable files simply do not match.
    pub async fn matches_file(&self, path: &Path) -> bool {
        match tokio::fs::read(path).await {
            Ok(bytes) => self.verify(&bytes).is_ok(),
            Err(e) => {
                tracing::trace!(path = %path.display(), error = %e, "No verifiable existing file");
                false
            }
        }
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm.prefix(), self.digest)
    }
}

impl std::str::FromStr for Checksum {
    type Err = ChecksumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Checksum {
    type Error = ChecksumParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Checksum> for String {
    fn from(checksum: Checksum) -> Self {
        checksum.to_string()
    }
}
