//! Proposer request rendering.
//!
//! Templates mark their sections with `<!-- section:KEY required|droppable -->`.
//! File contents are admitted whole, in path order, until the byte budget is
//! spent; droppable sections are removed if the request is still too large.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::proposal::ReplyMode;

const PROPOSE_JSON_TEMPLATE: &str = include_str!("prompts/propose_json.md");
const PROPOSE_LEGACY_TEMPLATE: &str = include_str!("prompts/propose_legacy.md");

static SECTION_RE: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->"));

/// Everything the proposer is told about the current cycle.
#[derive(Debug, Clone, Default)]
pub struct ProposalContext {
    pub goal: String,
    pub recent_audit_excerpt: String,
    pub file_contents: BTreeMap<String, String>,
}

/// Static facts about the engine that templates mention.
#[derive(Debug, Clone)]
pub struct PromptSettings {
    pub mode: ReplyMode,
    pub extensions: Vec<String>,
    pub interpreter: Vec<String>,
    pub has_tests: bool,
    pub budget_bytes: usize,
}

#[derive(Debug, Clone, Serialize)]
struct FileEntry<'a> {
    path: &'a str,
    content: &'a str,
}

/// Render the proposer request for `ctx`.
pub fn render_request(ctx: &ProposalContext, settings: &PromptSettings) -> Result<String> {
    let (name, source) = match settings.mode {
        ReplyMode::Json => ("propose_json", PROPOSE_JSON_TEMPLATE),
        ReplyMode::Legacy => ("propose_legacy", PROPOSE_LEGACY_TEMPLATE),
    };
    // Files share the budget with the template text, goal and history.
    let reserved = source.len() + ctx.goal.len() + ctx.recent_audit_excerpt.len();
    let (files, omitted) = select_files(
        &ctx.file_contents,
        settings.budget_bytes.saturating_sub(reserved),
    );

    // Sections are cut from the template, so markers inside file contents
    // or history are plain text.
    let env = Environment::new();
    let vars = context! {
        goal => ctx.goal.trim(),
        history => Some(ctx.recent_audit_excerpt.trim()).filter(|s| !s.is_empty()),
        files => files,
        omitted => omitted,
        extensions => settings.extensions,
        interpreter => settings.interpreter.join(" "),
        has_tests => settings.has_tests,
    };
    let mut sections = parse_sections(source)?;
    for section in &mut sections {
        section.content = env
            .render_str(&section.content, &vars)
            .with_context(|| format!("render template {name} section {}", section.key))?
            .trim()
            .to_string();
    }
    sections.retain(|s| s.required || !s.content.is_empty());
    apply_budget_to_sections(&mut sections, settings.budget_bytes);
    Ok(render_sections(&sections))
}

/// Admit whole files in path order while they fit in `budget` bytes.
fn select_files(
    files: &BTreeMap<String, String>,
    budget: usize,
) -> (Vec<FileEntry<'_>>, Vec<&str>) {
    let mut used = 0usize;
    let mut included = Vec::new();
    let mut omitted = Vec::new();
    for (path, content) in files {
        let cost = path.len() + content.len();
        if used + cost <= budget {
            used += cost;
            included.push(FileEntry { path, content });
        } else {
            omitted.push(path.as_str());
        }
    }
    if !omitted.is_empty() {
        debug!(omitted = omitted.len(), "files left out of request");
    }
    (included, omitted)
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Split a template into its marked sections, bodies still unrendered.
fn parse_sections(template: &str) -> Result<Vec<ParsedSection>> {
    let re = SECTION_RE
        .as_ref()
        .map_err(|err| anyhow::anyhow!("section marker pattern: {err}"))?;
    let markers: Vec<(usize, usize, String, bool)> = re
        .captures_iter(template)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((
                whole.start(),
                whole.end(),
                caps.get(1)?.as_str().to_string(),
                caps.get(2)?.as_str() == "required",
            ))
        })
        .collect();

    let mut sections = Vec::new();
    for (idx, (_, end, key, required)) in markers.iter().enumerate() {
        let stop = markers
            .get(idx + 1)
            .map_or(template.len(), |(start, ..)| *start);
        sections.push(ParsedSection {
            key: key.clone(),
            required: *required,
            content: template[*end..stop].to_string(),
        });
    }
    Ok(sections)
}

/// Drop droppable sections (history first) until the request fits.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len = |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    for key in ["history", "files"] {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }
}

fn render_sections(sections: &[ParsedSection]) -> String {
    let mut out = sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    out.push('\n');
    out
}
