//! Unified diffs between two tracked-file maps.

use std::collections::{BTreeMap, BTreeSet};

use similar::TextDiff;

/// Changes between a pre-image and a post-image of the tracked tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeDiff {
    /// Paths created, removed or modified (sorted).
    pub changed_files: Vec<String>,
    /// Concatenated unified diff with `a/` and `b/` headers.
    pub unified: String,
}

impl TreeDiff {
    pub fn is_empty(&self) -> bool {
        self.changed_files.is_empty()
    }
}

/// Diff `before` against `after`. Missing keys are treated as absent files.
pub fn diff_trees(before: &BTreeMap<String, String>, after: &BTreeMap<String, String>) -> TreeDiff {
    let paths: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    let mut out = TreeDiff::default();

    for path in paths {
        let old = before.get(path.as_str());
        let new = after.get(path.as_str());
        if old == new {
            continue;
        }
        let old_header = match old {
            Some(_) => format!("a/{path}"),
            None => "/dev/null".to_string(),
        };
        let new_header = match new {
            Some(_) => format!("b/{path}"),
            None => "/dev/null".to_string(),
        };
        let diff = TextDiff::from_lines(
            old.map(String::as_str).unwrap_or(""),
            new.map(String::as_str).unwrap_or(""),
        );
        out.unified.push_str(
            &diff
                .unified_diff()
                .context_radius(3)
                .header(&old_header, &new_header)
                .to_string(),
        );
        out.changed_files.push(path.clone());
    }
    out
}
