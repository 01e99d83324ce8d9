//! Tracked-file selection: extension allow-list plus gitignore-style excludes.
//!
//! Ignore patterns fall into three classes:
//! - `dir/` (trailing slash): everything under a matching directory path;
//! - `*.log` (no slash): matched against the file name only;
//! - `docs/*.md` (contains a slash): matched against the relative path.
//!
//! `*` may cross `/`, the same way `fnmatch` behaves.

use std::collections::BTreeSet;
use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};

/// Compiled tracked-file filter.
#[derive(Debug, Clone)]
pub struct FileFilter {
    extensions: BTreeSet<String>,
    exclude_dirs: BTreeSet<String>,
    dir_globs: GlobSet,
    name_globs: GlobSet,
    path_globs: GlobSet,
}

impl FileFilter {
    pub fn new(
        extensions: &[String],
        ignore: &[String],
        exclude_dirs: &[String],
    ) -> Result<Self, globset::Error> {
        let mut dir_globs = GlobSetBuilder::new();
        let mut name_globs = GlobSetBuilder::new();
        let mut path_globs = GlobSetBuilder::new();

        for raw in ignore {
            let pattern = raw.trim().trim_start_matches("./");
            if pattern.is_empty() || pattern.starts_with('#') || pattern.starts_with('!') {
                continue;
            }
            let pattern = pattern.strip_prefix('/').unwrap_or(pattern);
            if pattern.ends_with('/') {
                dir_globs.add(Glob::new(&format!("{pattern}*"))?);
            } else if !pattern.contains('/') {
                name_globs.add(Glob::new(pattern)?);
            } else {
                path_globs.add(Glob::new(pattern)?);
            }
        }

        Ok(Self {
            extensions: extensions
                .iter()
                .map(|ext| ext.trim().trim_start_matches('.').to_string())
                .filter(|ext| !ext.is_empty())
                .collect(),
            exclude_dirs: exclude_dirs
                .iter()
                .map(|dir| dir.trim().trim_matches('/').to_string())
                .filter(|dir| !dir.is_empty())
                .collect(),
            dir_globs: dir_globs.build()?,
            name_globs: name_globs.build()?,
            path_globs: path_globs.build()?,
        })
    }

    /// True if the directory at relative path `rel_dir` must not be walked.
    pub fn is_excluded_dir(&self, rel_dir: &str) -> bool {
        let name = rel_dir.rsplit('/').next().unwrap_or(rel_dir);
        if self.exclude_dirs.contains(name) {
            return true;
        }
        let with_slash = format!("{rel_dir}/");
        self.dir_globs.is_match(&with_slash) || self.path_globs.is_match(rel_dir)
    }

    /// True if `rel` names a file with an allow-listed extension.
    pub fn has_tracked_extension(&self, rel: &str) -> bool {
        Path::new(rel)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.contains(ext))
    }

    /// True if `rel` matches an ignore pattern or lies under an excluded directory.
    pub fn is_ignored(&self, rel: &str) -> bool {
        let mut dirs = rel.split('/').collect::<Vec<_>>();
        let name = dirs.pop().unwrap_or(rel);
        if dirs.iter().any(|dir| self.exclude_dirs.contains(*dir)) {
            return true;
        }
        self.dir_globs.is_match(rel)
            || self.name_globs.is_match(name)
            || self.path_globs.is_match(rel)
    }

    /// True if `rel` is eligible for snapshot and mutation.
    pub fn is_tracked(&self, rel: &str) -> bool {
        self.has_tracked_extension(rel) && !self.is_ignored(rel)
    }
}

/// Extract patterns from `.gitignore` contents (comments and blanks dropped).
pub fn parse_ignore_lines(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
