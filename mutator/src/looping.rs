//! Multi-cycle helper for `mutator cycle --iterations N`.

use std::path::Path;

use anyhow::Result;

use crate::core::types::{TransactionOutcome, TransactionStatus};
use crate::cycle::run_cycle;
use crate::io::source::ProposalSource;
use crate::io::validator::TestRunner;

/// Reason why `run_cycles` stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// The requested number of cycles ran.
    Completed,
    /// A cycle was skipped because the stall limit is reached.
    Stalled,
}

/// Summary of a multi-cycle invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub cycles_run: u32,
    pub stop: LoopStop,
}

/// Run up to `iterations` cycles, stopping early once the engine stalls.
///
/// `on_cycle` sees every outcome as it is produced. Startup errors abort the
/// loop and are returned unchanged.
pub fn run_cycles<S, T, F>(
    root: &Path,
    source: &S,
    tests: &T,
    iterations: u32,
    mut on_cycle: F,
) -> Result<LoopOutcome>
where
    S: ProposalSource,
    T: TestRunner,
    F: FnMut(&TransactionOutcome),
{
    let mut cycles_run = 0u32;
    while cycles_run < iterations {
        let outcome = run_cycle(root, source, tests)?;
        cycles_run += 1;
        on_cycle(&outcome);
        if outcome.status == TransactionStatus::SkippedStalled {
            return Ok(LoopOutcome {
                cycles_run,
                stop: LoopStop::Stalled,
            });
        }
    }
    Ok(LoopOutcome {
        cycles_run,
        stop: LoopStop::Completed,
    })
}
