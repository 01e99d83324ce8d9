//! Reading `.mutator/GOAL.md`.
//!
//! The goal is a human-facing document. Optional YAML frontmatter is kept for
//! operators' own bookkeeping and never sent to the proposer.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Read the goal body (frontmatter stripped, surrounding whitespace trimmed).
///
/// A missing file yields an empty goal.
pub fn read_goal(path: &Path) -> Result<String> {
    if !path.exists() {
        return Ok(String::new());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    Ok(goal_body(&contents).trim().to_string())
}

fn goal_body(contents: &str) -> &str {
    match split_frontmatter(contents) {
        Some((_, rest)) => rest,
        None => contents,
    }
}

/// Split a document into (frontmatter, rest). Returns None if it doesn't look like frontmatter.
fn split_frontmatter(contents: &str) -> Option<(&str, &str)> {
    let after = contents.strip_prefix("---\n")?;
    let end = after.find("\n---\n")?;
    Some((&after[..end], &after[end + 5..]))
}
