//! Append-only audit log (`.mutator/audit.jsonl`).
//!
//! One JSON object per line. The file is trimmed from the front once it grows
//! past `max_bytes`, keeping the newest `keep_percent` of the cap.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::types::{TransactionOutcome, TransactionStatus};
use crate::io::config::{AuditConfig, write_atomic};

/// RFC 3339 UTC timestamp with second precision.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEntry {
    Transaction {
        timestamp: String,
        cycle: u64,
        outcome_status: TransactionStatus,
        proposal_summary: Option<String>,
        reason: String,
        changed_files: Vec<String>,
    },
    Log {
        timestamp: String,
        level: String,
        message: String,
    },
    Error {
        timestamp: String,
        context: String,
        message: String,
    },
}

impl AuditEntry {
    pub fn from_outcome(outcome: &TransactionOutcome) -> Self {
        AuditEntry::Transaction {
            timestamp: outcome.timestamp.clone(),
            cycle: outcome.cycle,
            outcome_status: outcome.status,
            proposal_summary: outcome.proposal.as_ref().map(|p| p.summary()),
            reason: outcome.reason.clone(),
            changed_files: outcome.changed_files.clone(),
        }
    }

    /// Plain-text rendering used in proposer requests.
    pub fn render_line(&self) -> String {
        match self {
            AuditEntry::Transaction {
                timestamp,
                cycle,
                outcome_status,
                proposal_summary,
                reason,
                ..
            } => match proposal_summary {
                Some(summary) => format!(
                    "[{timestamp}] cycle {cycle} {}: {summary}; {reason}",
                    outcome_status.as_str()
                ),
                None => format!(
                    "[{timestamp}] cycle {cycle} {}: {reason}",
                    outcome_status.as_str()
                ),
            },
            AuditEntry::Log {
                timestamp,
                level,
                message,
            } => format!("[{timestamp}] {level} {message}"),
            AuditEntry::Error {
                timestamp,
                context,
                message,
            } => format!("[{timestamp}] error in {context}: {message}"),
        }
    }
}

/// Handle to the audit file.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
    max_bytes: u64,
    keep_percent: u8,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>, cfg: &AuditConfig) -> Self {
        Self {
            path: path.into(),
            max_bytes: cfg.max_bytes,
            keep_percent: cfg.keep_percent,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &AuditEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open audit log {}", self.path.display()))?;
        let line = serde_json::to_string(entry)?;
        writeln!(file, "{line}").with_context(|| format!("append {}", self.path.display()))?;
        drop(file);
        self.trim_if_needed()
    }

    pub fn record_outcome(&self, outcome: &TransactionOutcome) -> Result<()> {
        self.append(&AuditEntry::from_outcome(outcome))
    }

    pub fn log(&self, level: &str, message: impl Into<String>) -> Result<()> {
        self.append(&AuditEntry::Log {
            timestamp: timestamp_now(),
            level: level.to_string(),
            message: message.into(),
        })
    }

    pub fn error(&self, context: &str, message: impl Into<String>) -> Result<()> {
        self.append(&AuditEntry::Error {
            timestamp: timestamp_now(),
            context: context.to_string(),
            message: message.into(),
        })
    }

    /// All parseable entries, oldest first. Corrupt lines are skipped.
    pub fn read_entries(&self) -> Result<Vec<AuditEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read audit log {}", self.path.display()))?;
        let mut entries = Vec::new();
        for (idx, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(err) => warn!(line = idx + 1, err = %err, "skipping corrupt audit line"),
            }
        }
        Ok(entries)
    }

    /// Newest entries that fit in `max_chars`, rendered oldest first.
    pub fn recent_excerpt(&self, max_chars: usize) -> Result<String> {
        let mut used = 0usize;
        let mut lines = Vec::new();
        for entry in self.read_entries()?.iter().rev() {
            let line = entry.render_line();
            let cost = line.chars().count() + 1;
            if used + cost > max_chars {
                break;
            }
            used += cost;
            lines.push(line);
        }
        lines.reverse();
        Ok(lines.join("\n"))
    }

    fn trim_if_needed(&self) -> Result<()> {
        let len = fs::metadata(&self.path)
            .with_context(|| format!("stat {}", self.path.display()))?
            .len();
        if len <= self.max_bytes {
            return Ok(());
        }
        let target = self.max_bytes.saturating_mul(u64::from(self.keep_percent)) / 100;
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read audit log {}", self.path.display()))?;
        let lines: Vec<&str> = contents.lines().collect();

        let mut kept_bytes = 0u64;
        let mut start = lines.len();
        while start > 0 {
            let cost = lines[start - 1].len() as u64 + 1;
            if kept_bytes + cost > target {
                break;
            }
            kept_bytes += cost;
            start -= 1;
        }
        debug!(
            dropped = start,
            kept = lines.len() - start,
            "trimming audit log"
        );
        let mut kept = lines[start..].join("\n");
        if !kept.is_empty() {
            kept.push('\n');
        }
        write_atomic(&self.path, &kept, "jsonl.tmp")
    }
}
