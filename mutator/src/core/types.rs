//! Shared deterministic types for the transaction engine.
//!
//! These types define stable contracts between the applier, the validator and
//! the coordinator. They carry no I/O handles and serialize deterministically.

use serde::{Deserialize, Serialize};

use crate::core::error::ApplyError;
use crate::core::proposal::ChangeProposal;

/// Phase of a single transaction, used for tracing and failure attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Snapshotting,
    Proposing,
    Applying,
    Validating,
    Committing,
    RollingBack,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Snapshotting => "snapshotting",
            Phase::Proposing => "proposing",
            Phase::Applying => "applying",
            Phase::Validating => "validating",
            Phase::Committing => "committing",
            Phase::RollingBack => "rolling_back",
        }
    }
}

/// Final status of one coordinator cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Mutation validated and retained.
    Committed,
    /// Apply or validation failed; the pre-image was restored.
    RolledBack,
    /// Proposal identical to the previously committed one; nothing applied.
    SkippedRedundant,
    /// Stall limit reached; the proposer was not called.
    SkippedStalled,
    /// The proposer failed or returned unusable output; nothing applied.
    NoProposal,
}

impl TransactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Committed => "committed",
            TransactionStatus::RolledBack => "rolled_back",
            TransactionStatus::SkippedRedundant => "skipped_redundant",
            TransactionStatus::SkippedStalled => "skipped_stalled",
            TransactionStatus::NoProposal => "no_proposal",
        }
    }
}

/// Immutable record of one coordinator cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutcome {
    pub cycle: u64,
    pub status: TransactionStatus,
    pub proposal: Option<ChangeProposal>,
    pub reason: String,
    /// RFC 3339 UTC timestamp.
    pub timestamp: String,
    /// Tracked files whose content differs after the cycle (sorted).
    pub changed_files: Vec<String>,
    /// Message for a human operator (stall or `human_help` proposal).
    pub human_help: Option<String>,
}

impl TransactionOutcome {
    /// One-line rendering used for CLI output and logs.
    pub fn summary_line(&self) -> String {
        format!(
            "cycle {} {}: {}",
            self.cycle,
            self.status.as_str(),
            self.reason
        )
    }
}

/// Result of applying a proposal to the live tree.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApplyResult {
    pub ok: bool,
    pub error: Option<ApplyError>,
    /// Soft problems that did not fail the proposal (e.g. zero-match patches).
    pub warnings: Vec<String>,
    /// Relative paths the applier wrote to, in application order.
    pub touched: Vec<String>,
}

impl ApplyResult {
    pub fn success() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    pub fn failure(error: ApplyError) -> Self {
        Self {
            ok: false,
            error: Some(error),
            ..Self::default()
        }
    }
}

/// Result of validating the tree after a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationResult {
    pub ok: bool,
    pub failures: Vec<String>,
}

impl ValidationResult {
    pub fn passed() -> Self {
        Self {
            ok: true,
            failures: Vec::new(),
        }
    }

    pub fn failed(failure: impl Into<String>) -> Self {
        Self {
            ok: false,
            failures: vec![failure.into()],
        }
    }
}

/// Outcome of running the configured test suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestOutcome {
    Pass,
    /// Suite failed or could not complete (including timeout).
    Fail,
}
