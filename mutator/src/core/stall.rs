//! Stall and repeat detection across cycles.
//!
//! `StallState` is an explicit value: the coordinator loads it before a cycle,
//! derives the next state with [`advance`], and persists the result.

use serde::{Deserialize, Serialize};

use crate::core::types::TransactionStatus;

/// Default number of consecutive unproductive cycles before stalling.
pub const DEFAULT_STALL_LIMIT: u32 = 3;

/// Persisted bookkeeping for loop protection (`.mutator/state/stall.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StallState {
    /// Consecutive cycles that failed or changed nothing.
    pub consecutive_failures: u32,
    /// Digest of the canonical form of the last committed proposal.
    pub last_proposal_digest: Option<String>,
    /// Next cycle number (1-indexed, monotonically increasing).
    pub next_cycle: u64,
}

impl Default for StallState {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            last_proposal_digest: None,
            next_cycle: 1,
        }
    }
}

/// True if the failure counter has reached `limit`.
pub fn is_stalled(state: &StallState, limit: u32) -> bool {
    state.consecutive_failures >= limit
}

/// True if `digest` repeats the last committed proposal.
pub fn is_redundant(state: &StallState, digest: &str) -> bool {
    state.last_proposal_digest.as_deref() == Some(digest)
}

/// Derive the state after a cycle finished with `status`.
///
/// `changed` reports whether a commit altered any tracked file; `digest` is
/// the canonical digest of the attempted proposal, if one was obtained.
pub fn advance(
    state: &StallState,
    status: TransactionStatus,
    changed: bool,
    digest: Option<&str>,
) -> StallState {
    let mut next = state.clone();
    next.next_cycle = state.next_cycle.saturating_add(1);
    match status {
        TransactionStatus::Committed => {
            next.last_proposal_digest = digest.map(str::to_string);
            next.consecutive_failures = if changed {
                0
            } else {
                state.consecutive_failures.saturating_add(1)
            };
        }
        TransactionStatus::RolledBack
        | TransactionStatus::NoProposal
        | TransactionStatus::SkippedRedundant => {
            next.consecutive_failures = state.consecutive_failures.saturating_add(1);
        }
        TransactionStatus::SkippedStalled => {}
    }
    next
}

/// Clear the failure counter after a human acknowledged a stall.
pub fn reset(state: &StallState) -> StallState {
    StallState {
        consecutive_failures: 0,
        ..state.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn productive_commit_resets_failures_and_records_digest() {
        let state = StallState {
            consecutive_failures: 2,
            last_proposal_digest: None,
            next_cycle: 4,
        };
        let next = advance(&state, TransactionStatus::Committed, true, Some("abc"));
        assert_eq!(next.consecutive_failures, 0);
        assert_eq!(next.last_proposal_digest.as_deref(), Some("abc"));
        assert_eq!(next.next_cycle, 5);
    }

    #[test]
    fn empty_commit_counts_as_no_progress() {
        let next = advance(
            &StallState::default(),
            TransactionStatus::Committed,
            false,
            Some("abc"),
        );
        assert_eq!(next.consecutive_failures, 1);
        assert!(is_redundant(&next, "abc"));
    }

    #[test]
    fn rollback_increments_and_keeps_previous_digest() {
        let state = StallState {
            last_proposal_digest: Some("old".to_string()),
            ..StallState::default()
        };
        let next = advance(&state, TransactionStatus::RolledBack, false, Some("new"));
        assert_eq!(next.consecutive_failures, 1);
        assert_eq!(next.last_proposal_digest.as_deref(), Some("old"));
    }

    #[test]
    fn stall_short_circuit_leaves_counter_alone() {
        let state = StallState {
            consecutive_failures: 3,
            ..StallState::default()
        };
        assert!(is_stalled(&state, DEFAULT_STALL_LIMIT));
        let next = advance(&state, TransactionStatus::SkippedStalled, false, None);
        assert_eq!(next.consecutive_failures, 3);
        assert_eq!(next.next_cycle, 2);
    }

    #[test]
    fn reset_clears_only_the_counter() {
        let state = StallState {
            consecutive_failures: 5,
            last_proposal_digest: Some("d".to_string()),
            next_cycle: 9,
        };
        let cleared = reset(&state);
        assert_eq!(cleared.consecutive_failures, 0);
        assert_eq!(cleared.last_proposal_digest.as_deref(), Some("d"));
        assert_eq!(cleared.next_cycle, 9);
    }
}
