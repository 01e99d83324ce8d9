//! Proposal source abstraction.
//!
//! The [`ProposalSource`] trait decouples the coordinator from the model
//! backend. The production source pipes the rendered request into a configured
//! command; tests use scripted sources that return canned replies.

use std::path::PathBuf;
use std::process::Command;
use std::thread;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, instrument, warn};

use crate::core::error::AcquisitionError;
use crate::io::config::ProposerConfig;
use crate::io::process::run_command_with_timeout;

/// Parameters for one proposer invocation.
#[derive(Debug, Clone)]
pub struct ProposalRequest {
    /// Working directory for the proposer process.
    pub workdir: PathBuf,
    /// Rendered request text.
    pub prompt: String,
}

/// Abstraction over proposal-generation backends.
pub trait ProposalSource {
    /// Return the raw reply text for `request`.
    fn propose(&self, request: &ProposalRequest) -> Result<String, AcquisitionError>;
}

/// Source that runs an external command (request on stdin, reply on stdout).
#[derive(Debug, Clone)]
pub struct CommandProposalSource {
    pub command: Vec<String>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl CommandProposalSource {
    pub fn from_config(command: &[String], cfg: &ProposerConfig) -> Self {
        Self {
            command: command.to_vec(),
            timeout: Duration::from_secs(cfg.timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }
}

impl ProposalSource for CommandProposalSource {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs()))]
    fn propose(&self, request: &ProposalRequest) -> Result<String, AcquisitionError> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(AcquisitionError::Spawn("proposer command is empty".to_string()));
        };
        info!(program = %program, "requesting proposal");
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&request.workdir);

        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .map_err(|err| AcquisitionError::Spawn(format!("{program}: {err:#}")))?;

        if output.timed_out {
            return Err(AcquisitionError::Timeout {
                secs: self.timeout.as_secs(),
            });
        }
        if !output.status.success() {
            let detail = output.last_line();
            return Err(AcquisitionError::Failed(if detail.is_empty() {
                output.exit_description()
            } else {
                format!("{}: {detail}", output.exit_description())
            }));
        }
        if output.stdout_truncated > 0 {
            return Err(AcquisitionError::Malformed(format!(
                "reply exceeded {} bytes",
                self.output_limit_bytes
            )));
        }
        debug!(bytes = output.stdout.len(), "proposal received");
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Retry schedule for proposer calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Linear backoff unit: attempt `n` waits `n * backoff` plus jitter.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &ProposerConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            backoff: Duration::from_millis(cfg.backoff_ms),
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        let base = self.backoff.saturating_mul(attempt);
        let jitter_cap = u64::try_from(self.backoff.as_millis() / 4).unwrap_or(u64::MAX);
        let jitter = rand::thread_rng().gen_range(0..=jitter_cap);
        base.saturating_add(Duration::from_millis(jitter))
    }
}

/// Ask `source` for a reply, retrying transient failures.
///
/// Spawn failures are not retried; exhausting the attempts on timeouts or
/// failing exits is reported as a single [`AcquisitionError::Exhausted`].
pub fn acquire_reply<S: ProposalSource>(
    source: &S,
    request: &ProposalRequest,
    policy: &RetryPolicy,
) -> Result<String, AcquisitionError> {
    let mut last = None;
    for attempt in 1..=policy.max_attempts {
        match source.propose(request) {
            Ok(reply) => return Ok(reply),
            Err(err @ (AcquisitionError::Spawn(_) | AcquisitionError::Malformed(_))) => {
                return Err(err);
            }
            Err(err) => {
                warn!(attempt, err = %err, "proposer attempt failed");
                last = Some(err);
            }
        }
        if attempt < policy.max_attempts {
            thread::sleep(policy.delay(attempt));
        }
    }
    match last {
        Some(err) if policy.max_attempts > 1 => Err(AcquisitionError::Exhausted {
            attempts: policy.max_attempts,
            last: err.to_string(),
        }),
        Some(err) => Err(err),
        None => Err(AcquisitionError::Failed("no attempts were made".to_string())),
    }
}
