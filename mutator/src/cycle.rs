//! Transaction coordinator: one snapshot → propose → apply → validate cycle.
//!
//! Phases: `Idle → Snapshotting → Proposing → Applying → Validating →
//! {Committing | RollingBack} → Idle`. Once the first snapshot is taken,
//! every failure becomes a [`TransactionOutcome`]; only startup problems
//! (config, lock, state) are returned as errors.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::canonical::proposal_digest;
use crate::core::diff::diff_trees;
use crate::core::error::ApplyError;
use crate::core::proposal::{ChangeProposal, parse_reply};
use crate::core::stall::{StallState, advance, is_redundant, is_stalled, reset};
use crate::core::types::{ApplyResult, Phase, TransactionOutcome, TransactionStatus};
use crate::io::applier::{ApplyEnv, apply};
use crate::io::audit::{AuditLog, timestamp_now};
use crate::io::config::{EngineConfig, load_config};
use crate::io::cycle_log::CyclePaths;
use crate::io::goal::read_goal;
use crate::io::init::EnginePaths;
use crate::io::lock::TreeLock;
use crate::io::prompt::{PromptSettings, ProposalContext, render_request};
use crate::io::snapshot::{Snapshot, SnapshotStore, load_filter};
use crate::io::source::{ProposalRequest, ProposalSource, RetryPolicy, acquire_reply};
use crate::io::stall_store::{load_stall_state, write_stall_state};
use crate::io::validator::{TestRunner, ValidateRequest, validate};

/// Run one transaction against the tree at `root`.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn run_cycle<S: ProposalSource, T: TestRunner>(
    root: &Path,
    source: &S,
    tests: &T,
) -> Result<TransactionOutcome> {
    let started = Instant::now();
    let paths = EnginePaths::new(root);
    paths.ensure_initialized()?;
    let cfg = load_config(&paths.config_path)?;
    let _lock = TreeLock::acquire(&paths.lock_path)?;
    let state = load_stall_state(&paths.stall_path)
        .with_context(|| format!("load {}", paths.stall_path.display()))?;
    let filter = load_filter(root, &cfg.filter)?;
    let goal = read_goal(&paths.goal_path)?;
    let cycle_paths = CyclePaths::new(&paths.cycles_dir, state.next_cycle);
    cycle_paths.create()?;

    let run = CycleRun {
        root,
        cfg: &cfg,
        store: SnapshotStore::new(root, filter),
        audit: AuditLog::new(&paths.audit_path, &cfg.audit),
        cycle_paths: &cycle_paths,
        state: &state,
        goal: &goal,
        deadline: started + Duration::from_secs(cfg.cycle_timeout_secs),
    };
    let decision = run.execute(source, tests);

    let outcome = TransactionOutcome {
        cycle: state.next_cycle,
        status: decision.status,
        proposal: decision.proposal,
        reason: decision.reason,
        timestamp: timestamp_now(),
        changed_files: decision.changed_files,
        human_help: decision.human_help,
    };
    let next_state = advance(
        &state,
        outcome.status,
        !outcome.changed_files.is_empty(),
        decision.digest.as_deref(),
    );

    if let Err(err) = cycle_paths.write_outcome(&outcome) {
        warn!(err = %format!("{err:#}"), "failed to write cycle outcome");
    }
    if let Err(err) = run.audit.record_outcome(&outcome) {
        warn!(err = %format!("{err:#}"), "failed to append audit record");
    }
    write_stall_state(&paths.stall_path, &next_state)?;

    info!(
        cycle = outcome.cycle,
        status = outcome.status.as_str(),
        changed = outcome.changed_files.len(),
        failures = next_state.consecutive_failures,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "cycle finished"
    );
    Ok(outcome)
}

/// Clear the stall counter so cycles resume.
pub fn reset_stall(root: &Path) -> Result<StallState> {
    let paths = EnginePaths::new(root);
    paths.ensure_initialized()?;
    let _lock = TreeLock::acquire(&paths.lock_path)?;
    let state = load_stall_state(&paths.stall_path)?;
    let cleared = reset(&state);
    write_stall_state(&paths.stall_path, &cleared)?;
    let audit_cfg = load_config(&paths.config_path)?.audit;
    if let Err(err) = AuditLog::new(&paths.audit_path, &audit_cfg).log(
        "info",
        format!(
            "stall counter reset by operator (was {})",
            state.consecutive_failures
        ),
    ) {
        warn!(err = %format!("{err:#}"), "failed to append audit record");
    }
    Ok(cleared)
}

/// Result of the cycle body before it is stamped into an outcome.
struct Decision {
    status: TransactionStatus,
    proposal: Option<ChangeProposal>,
    reason: String,
    changed_files: Vec<String>,
    human_help: Option<String>,
    digest: Option<String>,
}

impl Decision {
    fn new(status: TransactionStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            proposal: None,
            reason: reason.into(),
            changed_files: Vec::new(),
            human_help: None,
            digest: None,
        }
    }

    fn with_proposal(mut self, proposal: ChangeProposal, digest: String) -> Self {
        self.proposal = Some(proposal);
        self.digest = Some(digest);
        self
    }
}

struct CycleRun<'a> {
    root: &'a Path,
    cfg: &'a EngineConfig,
    store: SnapshotStore,
    audit: AuditLog,
    cycle_paths: &'a CyclePaths,
    state: &'a StallState,
    goal: &'a str,
    deadline: Instant,
}

impl CycleRun<'_> {
    fn execute<S: ProposalSource, T: TestRunner>(&self, source: &S, tests: &T) -> Decision {
        let cycle = self.state.next_cycle;
        enter(cycle, Phase::Idle);
        if is_stalled(self.state, self.cfg.stall_limit) {
            let mut decision = Decision::new(
                TransactionStatus::SkippedStalled,
                format!(
                    "stall limit reached ({} consecutive unproductive cycles)",
                    self.state.consecutive_failures
                ),
            );
            decision.human_help = Some(format!(
                "The engine stopped after {} consecutive cycles without progress. \
                 Review .mutator/audit.jsonl and the goal, then run `mutator reset`.",
                self.state.consecutive_failures
            ));
            return decision;
        }

        enter(cycle, Phase::Snapshotting);
        let snapshot = self.store.capture();

        enter(cycle, Phase::Proposing);
        let proposal = match self.obtain_proposal(&snapshot, source) {
            Ok(proposal) => proposal,
            Err(reason) => return Decision::new(TransactionStatus::NoProposal, reason),
        };
        let digest = proposal_digest(&proposal);
        if is_redundant(self.state, &digest) {
            return Decision::new(
                TransactionStatus::SkippedRedundant,
                "proposal repeats the previously committed proposal",
            )
            .with_proposal(proposal, digest);
        }

        enter(cycle, Phase::Applying);
        let applied = self.apply_guarded(&proposal);
        if !applied.ok {
            let reason = match &applied.error {
                Some(err) => format!("apply failed ({}): {err}", err.kind()),
                None => "apply failed".to_string(),
            };
            return self
                .roll_back(&snapshot, reason)
                .with_proposal(proposal, digest);
        }

        if let ChangeProposal::HumanHelp { message } = &proposal {
            enter(cycle, Phase::Committing);
            let mut decision = Decision::new(
                TransactionStatus::Committed,
                "proposer asked for human help",
            );
            decision.human_help = Some(message.clone());
            return decision.with_proposal(proposal, digest);
        }
        if proposal.is_inert() {
            enter(cycle, Phase::Committing);
            return Decision::new(TransactionStatus::Committed, "proposer reported nothing to do")
                .with_proposal(proposal, digest);
        }

        enter(cycle, Phase::Validating);
        let after = self.store.capture();
        let Some(test_timeout) = remaining_budget(self.deadline) else {
            return self
                .roll_back(&snapshot, "cycle budget exhausted before validation".to_string())
                .with_proposal(proposal, digest);
        };
        let validated = guarded("validator", || {
            validate(
                &ValidateRequest {
                    root: self.root,
                    tree: &after,
                    cfg: &self.cfg.validate,
                    test_timeout,
                    test_log_path: &self.cycle_paths.tests_log_path,
                },
                tests,
            )
        });
        let failures = match validated {
            Ok(result) if result.ok => None,
            Ok(result) => Some(result.failures.join("; ")),
            Err(panic) => Some(panic),
        };
        if let Some(reason) = failures {
            return self
                .roll_back(&snapshot, format!("validation failed: {reason}"))
                .with_proposal(proposal, digest);
        }

        enter(cycle, Phase::Committing);
        let diff = diff_trees(snapshot.files(), after.files());
        if !diff.is_empty()
            && let Err(err) = self.cycle_paths.write_diff(&diff.unified)
        {
            warn!(err = %format!("{err:#}"), "failed to write cycle diff");
        }
        let mut reason = if diff.is_empty() {
            "validated; no tracked file changed".to_string()
        } else {
            format!("validated; {} file(s) changed", diff.changed_files.len())
        };
        if !applied.warnings.is_empty() {
            reason.push_str(&format!(" (warnings: {})", applied.warnings.join("; ")));
        }
        let mut decision = Decision::new(TransactionStatus::Committed, reason);
        decision.changed_files = diff.changed_files;
        decision.with_proposal(proposal, digest)
    }

    /// Render the request, call the proposer and parse its reply.
    fn obtain_proposal<S: ProposalSource>(
        &self,
        snapshot: &Snapshot,
        source: &S,
    ) -> Result<ChangeProposal, String> {
        let history = self
            .audit
            .recent_excerpt(self.cfg.audit.excerpt_chars)
            .unwrap_or_else(|err| {
                warn!(err = %format!("{err:#}"), "failed to read audit history");
                String::new()
            });
        let context = ProposalContext {
            goal: self.goal.to_string(),
            recent_audit_excerpt: history,
            file_contents: snapshot.files().clone(),
        };
        let settings = PromptSettings {
            mode: self.cfg.mode,
            extensions: self.cfg.filter.extensions.clone(),
            interpreter: self.cfg.sandbox.interpreter.clone(),
            has_tests: !self.cfg.validate.test_command.is_empty(),
            budget_bytes: self.cfg.proposer.context_budget_bytes,
        };
        let prompt =
            render_request(&context, &settings).map_err(|err| format!("render request: {err:#}"))?;
        self.note_artifact("request", self.cycle_paths.write_request(&prompt));

        let request = ProposalRequest {
            workdir: self.root.to_path_buf(),
            prompt,
        };
        let reply = acquire_reply(source, &request, &RetryPolicy::from_config(&self.cfg.proposer))
            .map_err(|err| err.to_string())?;
        self.note_artifact("reply", self.cycle_paths.write_reply(&reply));

        let proposal = parse_reply(&reply, self.cfg.mode).map_err(|err| err.to_string())?;
        self.note_artifact("proposal", self.cycle_paths.write_proposal(&proposal));
        debug!(proposal = %proposal.summary(), "proposal parsed");
        Ok(proposal)
    }

    fn apply_guarded(&self, proposal: &ChangeProposal) -> ApplyResult {
        let env = ApplyEnv {
            protected: &self.cfg.protected,
            filter: self.store.filter(),
            sandbox: &self.cfg.sandbox,
        };
        match guarded("applier", || apply(self.root, proposal, &env)) {
            Ok(result) => result,
            Err(reason) => ApplyResult::failure(ApplyError::Execution(reason)),
        }
    }

    fn roll_back(&self, snapshot: &Snapshot, reason: String) -> Decision {
        enter(self.state.next_cycle, Phase::RollingBack);
        warn!(reason = %reason, "rolling back");
        let report = self.store.restore(snapshot);
        for failure in &report.failures {
            if let Err(err) = self.audit.error("restore", failure.clone()) {
                warn!(err = %format!("{err:#}"), "failed to append audit record");
            }
        }
        let reason = if report.is_clean() {
            reason
        } else {
            format!(
                "{reason}; restore incomplete ({} failure(s))",
                report.failures.len()
            )
        };
        Decision::new(TransactionStatus::RolledBack, reason)
    }

    fn note_artifact(&self, name: &str, written: Result<()>) {
        if let Err(err) = written {
            warn!(artifact = name, err = %format!("{err:#}"), "failed to write cycle artifact");
        }
    }
}

fn enter(cycle: u64, phase: Phase) {
    debug!(cycle, phase = phase.as_str(), "phase");
}

fn remaining_budget(deadline: Instant) -> Option<Duration> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    (!remaining.is_zero()).then_some(remaining)
}

/// Run `stage`, turning a panic into a failure message.
fn guarded<R>(stage: &str, f: impl FnOnce() -> R) -> Result<R, String> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        warn!(stage, message = %message, "stage panicked");
        format!("{stage} panicked: {message}")
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
