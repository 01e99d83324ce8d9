//! Typed failures of the mutation engine.
//!
//! Plumbing code propagates `anyhow::Error`; these enums name the failures the
//! coordinator converts into transaction outcomes.

use thiserror::Error;

/// The proposal-generation collaborator could not produce a usable proposal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquisitionError {
    #[error("proposer could not be started: {0}")]
    Spawn(String),
    #[error("proposer timed out after {secs}s")]
    Timeout { secs: u64 },
    #[error("proposer failed: {0}")]
    Failed(String),
    #[error("proposer gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
    #[error("malformed proposal: {0}")]
    Malformed(String),
}

/// A single proposal could not be applied to the tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("path escapes project root: {0}")]
    PathEscape(String),
    #[error("path is protected: {0}")]
    Protected(String),
    #[error("path is not a tracked file: {0}")]
    Untracked(String),
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("invalid pattern for {path}: {message}")]
    InvalidPattern { path: String, message: String },
    #[error("i/o error on {path}: {message}")]
    Io { path: String, message: String },
    #[error("code execution failed: {0}")]
    Execution(String),
    #[error("executable code channel is disabled (set sandbox.enabled)")]
    ExecutionDisabled,
}

impl ApplyError {
    /// Stable short name for audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            ApplyError::PathEscape(_) => "PathEscape",
            ApplyError::Protected(_) => "Protected",
            ApplyError::Untracked(_) => "Untracked",
            ApplyError::NotFound(_) => "NotFound",
            ApplyError::InvalidPattern { .. } => "InvalidPattern",
            ApplyError::Io { .. } => "Io",
            ApplyError::Execution(_) => "Execution",
            ApplyError::ExecutionDisabled => "ExecutionDisabled",
        }
    }
}

/// Startup failures that the CLI maps to dedicated exit codes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CycleStartError {
    #[error("another cycle holds the lock {path}")]
    Locked { path: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_error_messages_name_the_path() {
        let err = ApplyError::PathEscape("../outside.py".to_string());
        assert_eq!(err.kind(), "PathEscape");
        assert!(err.to_string().contains("../outside.py"));
    }

    #[test]
    fn exhausted_reports_attempts_and_last_error() {
        let err = AcquisitionError::Exhausted {
            attempts: 3,
            last: "proposer timed out after 5s".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "proposer gave up after 3 attempts: proposer timed out after 5s"
        );
    }
}
