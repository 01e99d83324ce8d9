//! Lexical containment rules for proposal paths.
//!
//! Paths are resolved without touching the filesystem. Symlinked ancestors are
//! checked separately by the applier, which has access to the tree.

use crate::core::error::ApplyError;

/// Normalize a proposal path into a `/`-separated path relative to the root.
///
/// Rejects empty paths, absolute paths (including Windows drive and UNC
/// forms) and any `..` that would climb above the root.
pub fn normalize_relative(raw: &str) -> Result<String, ApplyError> {
    let unified = raw.trim().replace('\\', "/");
    if unified.is_empty() {
        return Err(ApplyError::PathEscape(raw.to_string()));
    }
    if unified.starts_with('/') || has_drive_prefix(&unified) {
        return Err(ApplyError::PathEscape(raw.to_string()));
    }

    let mut parts: Vec<&str> = Vec::new();
    for component in unified.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(ApplyError::PathEscape(raw.to_string()));
                }
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return Err(ApplyError::PathEscape(raw.to_string()));
    }
    Ok(parts.join("/"))
}

/// True if `rel` equals or lies under any of the `protected` directories.
pub fn is_protected(rel: &str, protected: &[String]) -> bool {
    protected.iter().any(|dir| {
        let dir = dir.trim_matches('/');
        !dir.is_empty()
            && (rel == dir
                || rel
                    .strip_prefix(dir)
                    .is_some_and(|rest| rest.starts_with('/')))
    })
}

/// Normalize `raw` and enforce the protected-directory rule.
pub fn checked_relative(raw: &str, protected: &[String]) -> Result<String, ApplyError> {
    let rel = normalize_relative(raw)?;
    if is_protected(&rel, protected) {
        return Err(ApplyError::Protected(rel));
    }
    Ok(rel)
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_dot_segments() {
        assert_eq!(normalize_relative("./src/../a.py").expect("ok"), "a.py");
        assert_eq!(normalize_relative("pkg//mod.py").expect("ok"), "pkg/mod.py");
        assert_eq!(normalize_relative("pkg\\mod.py").expect("ok"), "pkg/mod.py");
    }

    #[test]
    fn rejects_parent_traversal() {
        assert!(matches!(
            normalize_relative("../outside.py"),
            Err(ApplyError::PathEscape(_))
        ));
        assert!(normalize_relative("../../etc/passwd").is_err());
        assert!(normalize_relative("a/../../b").is_err());
    }

    #[test]
    fn rejects_absolute_and_empty_paths() {
        assert!(normalize_relative("/etc/passwd").is_err());
        assert!(normalize_relative("C:/Windows/win.ini").is_err());
        assert!(normalize_relative("").is_err());
        assert!(normalize_relative(".").is_err());
    }

    #[test]
    fn protected_matches_whole_components_only() {
        let protected = vec![".mutator".to_string(), ".git/".to_string()];
        assert!(is_protected(".mutator", &protected));
        assert!(is_protected(".mutator/state/stall.json", &protected));
        assert!(is_protected(".git/config", &protected));
        assert!(!is_protected(".mutatorx/a.py", &protected));
        assert!(!is_protected("src/.mutator/a.py", &protected));
    }

    #[test]
    fn checked_relative_reports_protected() {
        let protected = vec![".mutator".to_string()];
        assert!(matches!(
            checked_relative("./.mutator/config.toml", &protected),
            Err(ApplyError::Protected(_))
        ));
    }
}
