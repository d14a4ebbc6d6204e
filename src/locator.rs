//! Locator parsing and normalization.
//!
//! A locator is either a URL (`https://host/path`, `file:///tmp/x`) or a bare
//! filesystem path. Normalization produces the [`DedupKey`] used by the
//! in-flight registry: two locators with equal keys address the same resource.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use url::Url;

/// Why a locator string was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocatorError {
    /// Empty or whitespace-only locator
    #[error("locator is empty")]
    Empty,

    /// Looks like a URL but does not parse as one
    #[error("invalid URL {locator}: {reason}")]
    InvalidUrl {
        /// The offending locator
        locator: String,
        /// Parser message
        reason: String,
    },

    /// A `file:` URL that does not map to a local path
    #[error("file URL {0} does not name a local path")]
    InvalidFileUrl(String),
}

/// Canonical identity of a locator
///
/// Local paths are kept as paths so that names which are not valid UTF-8
/// stay distinct.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DedupKey {
    /// Normalized URL of a remote resource
    Url(String),
    /// Lexically normalized local path
    Path(PathBuf),
}

impl std::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DedupKey::Url(url) => f.write_str(url),
            DedupKey::Path(path) => write!(f, "file:{}", path.display()),
        }
    }
}

/// What a parsed locator points at
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// Remote resource addressed by URL
    Url(Url),
    /// Local file (bare path or `file:` URL)
    Path(PathBuf),
}

/// A validated, normalized locator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Locator {
    raw: String,
    target: Target,
    key: DedupKey,
}

impl Locator {
    /// Parse and normalize a locator string
    pub fn parse(raw: &str) -> Result<Self, LocatorError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(LocatorError::Empty);
        }

        let target = if looks_like_url(trimmed) {
            let mut url = Url::parse(trimmed).map_err(|e| LocatorError::InvalidUrl {
                locator: trimmed.to_string(),
                reason: e.to_string(),
            })?;
            if url.scheme() == "file" {
                let path = url
                    .to_file_path()
                    .map_err(|()| LocatorError::InvalidFileUrl(trimmed.to_string()))?;
                Target::Path(normalize_path(&path))
            } else {
                // Fragments never reach the server
                url.set_fragment(None);
                if url.query() == Some("") {
                    url.set_query(None);
                }
                Target::Url(url)
            }
        } else {
            Target::Path(normalize_path(Path::new(trimmed)))
        };

        let key = match &target {
            Target::Url(url) => DedupKey::Url(url.as_str().to_string()),
            Target::Path(path) => DedupKey::Path(path.clone()),
        };

        Ok(Self {
            raw: trimmed.to_string(),
            target,
            key,
        })
    }

    /// The locator as submitted (whitespace-trimmed)
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// What the locator points at
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Scheme of the locator; bare paths report `file`
    pub fn scheme(&self) -> &str {
        match &self.target {
            Target::Url(url) => url.scheme(),
            Target::Path(_) => "file",
        }
    }

    /// Canonical identity used for deduplication
    pub fn dedup_key(&self) -> &DedupKey {
        &self.key
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A URL needs a scheme of at least two characters; `C:\dir` is a path.
fn looks_like_url(s: &str) -> bool {
    match s.find(':') {
        Some(idx) if idx >= 2 => {
            let scheme = &s[..idx];
            scheme
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        _ => false,
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let last_is_normal = matches!(out.components().next_back(), Some(Component::Normal(_)));
                if last_is_normal {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
