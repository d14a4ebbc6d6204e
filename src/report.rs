//! Batch summaries and the process exit-code policy.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::FailureKind;
use crate::types::{FetchOutcome, FetchStatus};

/// Exit code when every request succeeded (or was already present)
pub const EXIT_SUCCESS: u8 = 0;
/// Exit code when at least one request failed
pub const EXIT_PARTIAL_FAILURE: u8 = 1;
/// Exit code for errors that prevented the batch from running
pub const EXIT_FATAL: u8 = 2;

/// Aggregate counts over a batch's outcomes
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Number of requests
    pub total: usize,
    /// Retrieved and written
    pub succeeded: usize,
    /// Destination already held verified content
    pub skipped: usize,
    /// Ended in a failure of any kind
    pub failed: usize,
    /// Failures per kind
    pub failures: HashMap<FailureKind, usize>,
    /// Bytes retrieved across successful requests
    pub bytes: u64,
}

impl BatchSummary {
    /// Summarize `outcomes`
    ///
    /// Deduplicated requests count once per batch position, like any other.
    pub fn from_outcomes(outcomes: &[Arc<FetchOutcome>]) -> Self {
        let mut summary = Self {
            total: outcomes.len(),
            ..Self::default()
        };
        for outcome in outcomes {
            match outcome.status {
                FetchStatus::Succeeded => {
                    summary.succeeded += 1;
                    summary.bytes += outcome.bytes.unwrap_or(0);
                }
                FetchStatus::SkippedDuplicate => summary.skipped += 1,
                FetchStatus::Failed(kind) => {
                    summary.failed += 1;
                    *summary.failures.entry(kind).or_insert(0) += 1;
                }
            }
        }
        summary
    }

    /// Whether nothing failed
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Process exit code for this batch
    pub fn exit_code(&self) -> u8 {
        if self.all_succeeded() {
            EXIT_SUCCESS
        } else {
            EXIT_PARTIAL_FAILURE
        }
    }
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} requests: {} succeeded, {} skipped, {} failed ({} bytes)",
            self.total, self.succeeded, self.skipped, self.failed, self.bytes
        )?;
        if !self.failures.is_empty() {
            let mut kinds: Vec<_> = self.failures.iter().collect();
            kinds.sort_by_key(|(kind, _)| kind.error_code());
            let detail: Vec<String> = kinds
                .into_iter()
                .map(|(kind, count)| format!("{kind}={count}"))
                .collect();
            write!(f, " [{}]", detail.join(", "))?;
        }
        Ok(())
    }
}

/// One line describing a single outcome, for terminal output
pub fn describe(outcome: &FetchOutcome) -> String {
    match outcome.status {
        FetchStatus::Succeeded => format!(
            "ok      {} -> {} ({} bytes, {} attempt{})",
            outcome.locator,
            outcome.destination,
            outcome.bytes.unwrap_or(0),
            outcome.attempts,
            if outcome.attempts == 1 { "" } else { "s" }
        ),
        FetchStatus::SkippedDuplicate => format!(
            "skipped {} -> {} (already verified)",
            outcome.locator, outcome.destination
        ),
        FetchStatus::Failed(kind) => format!(
            "failed  {} -> {}: {} after {} attempt{}: {}",
            outcome.locator,
            outcome.destination,
            kind,
            outcome.attempts,
            if outcome.attempts == 1 { "" } else { "s" },
            outcome.last_error.as_deref().unwrap_or("unknown error")
        ),
    }
}
