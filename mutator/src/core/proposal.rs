//! Change proposals and their wire formats.
//!
//! A proposal is exactly one [`ChangeProposal`] variant. JSON replies are
//! checked against `schemas/proposal.schema.json` before decoding so that a
//! malformed reply is reported with schema messages instead of a serde error
//! deep inside a variant.

use std::sync::OnceLock;

use jsonschema::Draft;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::AcquisitionError;

const PROPOSAL_SCHEMA: &str = include_str!("../../schemas/proposal.schema.json");

/// Whole-file content for write/append operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
}

/// Regex substitution inside one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePatch {
    pub path: String,
    pub search: String,
    pub replace: String,
    /// Maximum substitutions; `0` replaces every occurrence.
    #[serde(default)]
    pub count: usize,
}

/// A requested mutation. The applier dispatches purely on the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeProposal {
    FileWrite { files: Vec<FileContent> },
    FileAppend { files: Vec<FileContent> },
    TextPatch { patches: Vec<FilePatch> },
    ExecutableCode { source_text: String },
    NoOp,
    HumanHelp { message: String },
}

impl ChangeProposal {
    /// Relative paths named by file operations, in proposal order.
    pub fn target_paths(&self) -> Vec<&str> {
        match self {
            ChangeProposal::FileWrite { files } | ChangeProposal::FileAppend { files } => {
                files.iter().map(|f| f.path.as_str()).collect()
            }
            ChangeProposal::TextPatch { patches } => {
                patches.iter().map(|p| p.path.as_str()).collect()
            }
            ChangeProposal::ExecutableCode { .. }
            | ChangeProposal::NoOp
            | ChangeProposal::HumanHelp { .. } => Vec::new(),
        }
    }

    /// True when the proposal cannot change the filesystem.
    pub fn is_inert(&self) -> bool {
        matches!(self, ChangeProposal::NoOp | ChangeProposal::HumanHelp { .. })
    }

    /// Short human-readable description for audit records.
    pub fn summary(&self) -> String {
        match self {
            ChangeProposal::FileWrite { files } => {
                format!("file_write {}", join_paths(self.target_paths(), files.len()))
            }
            ChangeProposal::FileAppend { files } => {
                format!("file_append {}", join_paths(self.target_paths(), files.len()))
            }
            ChangeProposal::TextPatch { patches } => {
                format!("text_patch {}", join_paths(self.target_paths(), patches.len()))
            }
            ChangeProposal::ExecutableCode { source_text } => {
                format!("executable_code ({} bytes)", source_text.len())
            }
            ChangeProposal::NoOp => "no_op".to_string(),
            ChangeProposal::HumanHelp { .. } => "human_help".to_string(),
        }
    }
}

fn join_paths(paths: Vec<&str>, len: usize) -> String {
    let mut unique: Vec<&str> = Vec::new();
    for path in paths {
        if !unique.contains(&path) {
            unique.push(path);
        }
    }
    format!("[{}] ({len})", unique.join(", "))
}

/// How the proposer's reply is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyMode {
    /// Structured JSON actions only.
    #[default]
    Json,
    /// Raw source for the sandboxed execution channel.
    Legacy,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum WireAction {
    ModifyFiles,
    CreateFiles,
    AppendFiles,
    PatchFiles,
    HumanHelp,
    NoOp,
}

#[derive(Debug, Deserialize)]
struct WireReply {
    action: WireAction,
    #[serde(default)]
    changes: Vec<Value>,
    #[serde(default)]
    message_to_human: Option<String>,
}

/// Parse a proposer reply according to `mode`.
///
/// In JSON mode a reply that is not a schema-valid action object is
/// `Malformed`; it is never reinterpreted as executable code.
pub fn parse_reply(raw: &str, mode: ReplyMode) -> Result<ChangeProposal, AcquisitionError> {
    let body = strip_code_fence(raw);
    match mode {
        ReplyMode::Json => parse_json_reply(body),
        ReplyMode::Legacy => {
            if body.trim().is_empty() {
                return Err(AcquisitionError::Malformed("empty reply".to_string()));
            }
            Ok(ChangeProposal::ExecutableCode {
                source_text: ensure_trailing_newline(body),
            })
        }
    }
}

fn parse_json_reply(body: &str) -> Result<ChangeProposal, AcquisitionError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|err| AcquisitionError::Malformed(format!("reply is not JSON: {err}")))?;
    validate_schema(&value)?;
    let reply: WireReply = serde_json::from_value(value)
        .map_err(|err| AcquisitionError::Malformed(format!("decode reply: {err}")))?;

    let proposal = match reply.action {
        WireAction::ModifyFiles | WireAction::CreateFiles => ChangeProposal::FileWrite {
            files: decode_changes(reply.changes)?,
        },
        WireAction::AppendFiles => ChangeProposal::FileAppend {
            files: decode_changes(reply.changes)?,
        },
        WireAction::PatchFiles => ChangeProposal::TextPatch {
            patches: decode_changes(reply.changes)?,
        },
        WireAction::HumanHelp => ChangeProposal::HumanHelp {
            message: reply.message_to_human.unwrap_or_default().trim().to_string(),
        },
        WireAction::NoOp => ChangeProposal::NoOp,
    };
    Ok(proposal)
}

fn decode_changes<T: for<'de> Deserialize<'de>>(
    changes: Vec<Value>,
) -> Result<Vec<T>, AcquisitionError> {
    changes
        .into_iter()
        .enumerate()
        .map(|(idx, change)| {
            serde_json::from_value(change)
                .map_err(|err| AcquisitionError::Malformed(format!("changes[{idx}]: {err}")))
        })
        .collect()
}

fn compiled_schema() -> Result<&'static jsonschema::Validator, AcquisitionError> {
    static SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();
    let compiled = SCHEMA.get_or_init(|| {
        let schema: Value = serde_json::from_str(PROPOSAL_SCHEMA)
            .map_err(|err| format!("parse proposal schema: {err}"))?;
        jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&schema)
            .map_err(|err| format!("compile proposal schema: {err}"))
    });
    compiled
        .as_ref()
        .map_err(|err| AcquisitionError::Malformed(err.clone()))
}

fn validate_schema(instance: &Value) -> Result<(), AcquisitionError> {
    let validator = compiled_schema()?;
    let messages: Vec<String> = validator
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(AcquisitionError::Malformed(format!(
            "schema validation failed: {}",
            messages.join("; ")
        )));
    }
    Ok(())
}

/// Remove one surrounding Markdown code fence, if present.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some((_, after_info)) = rest.split_once('\n') else {
        return trimmed;
    };
    after_info
        .trim_end()
        .strip_suffix("```")
        .unwrap_or(after_info)
        .trim_end()
}

fn ensure_trailing_newline(text: &str) -> String {
    let mut out = text.to_string();
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}
