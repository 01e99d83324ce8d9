//! Per-cycle artifacts under `.mutator/cycles/<n>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::proposal::ChangeProposal;
use crate::core::types::TransactionOutcome;

#[derive(Debug, Clone)]
pub struct CyclePaths {
    pub dir: PathBuf,
    pub request_path: PathBuf,
    pub reply_path: PathBuf,
    pub proposal_path: PathBuf,
    pub outcome_path: PathBuf,
    pub diff_path: PathBuf,
    pub tests_log_path: PathBuf,
}

impl CyclePaths {
    pub fn new(cycles_dir: &Path, cycle: u64) -> Self {
        let dir = cycles_dir.join(cycle.to_string());
        Self {
            dir: dir.clone(),
            request_path: dir.join("request.md"),
            reply_path: dir.join("reply.txt"),
            proposal_path: dir.join("proposal.json"),
            outcome_path: dir.join("outcome.json"),
            diff_path: dir.join("changes.diff"),
            tests_log_path: dir.join("tests.log"),
        }
    }

    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create cycle dir {}", self.dir.display()))
    }

    pub fn write_request(&self, request: &str) -> Result<()> {
        write_text(&self.request_path, request)
    }

    pub fn write_reply(&self, reply: &str) -> Result<()> {
        write_text(&self.reply_path, reply)
    }

    pub fn write_proposal(&self, proposal: &ChangeProposal) -> Result<()> {
        write_json(&self.proposal_path, proposal)
    }

    pub fn write_diff(&self, diff: &str) -> Result<()> {
        write_text(&self.diff_path, diff)
    }

    pub fn write_outcome(&self, outcome: &TransactionOutcome) -> Result<()> {
        write_json(&self.outcome_path, outcome)
    }
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create cycle dir {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}
