//! Snapshot store: point-in-time copies of every tracked file.
//!
//! A [`Snapshot`] is owned by exactly one transaction. It is dropped on commit
//! and consumed by [`SnapshotStore::restore`] on rollback.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::core::filter::{FileFilter, parse_ignore_lines};
use crate::io::config::FilterConfig;

/// Immutable pre-image of the tracked tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    files: BTreeMap<String, String>,
    skipped: BTreeSet<String>,
    /// Raw bytes of skipped files that were readable but not UTF-8.
    raw: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

impl Snapshot {
    /// Tracked files and their contents, keyed by relative path.
    pub fn files(&self) -> &BTreeMap<String, String> {
        &self.files
    }

    pub fn get(&self, rel: &str) -> Option<&str> {
        self.files.get(rel).map(String::as_str)
    }

    /// Tracked-extension files that could not be read as UTF-8 text.
    pub fn skipped(&self) -> &BTreeSet<String> {
        &self.skipped
    }

    /// True if `rel` existed at capture time (readable or not).
    pub fn knows(&self, rel: &str) -> bool {
        self.files.contains_key(rel) || self.skipped.contains(rel)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Per-file results of a restore. Failures never abort the restore.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub rewritten: Vec<String>,
    pub removed: Vec<String>,
    pub removed_dirs: Vec<String>,
    pub failures: Vec<String>,
}

impl RestoreReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Captures and restores the tracked files under one root.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
    filter: FileFilter,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>, filter: FileFilter) -> Self {
        Self {
            root: root.into(),
            filter,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn filter(&self) -> &FileFilter {
        &self.filter
    }

    /// Read every tracked file. Unreadable entries are skipped, never fatal.
    #[instrument(skip_all, fields(root = %self.root.display()))]
    pub fn capture(&self) -> Snapshot {
        let mut snapshot = Snapshot::default();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || relative_path(&self.root, entry.path())
                        .is_none_or(|rel| !self.filter.is_excluded_dir(&rel))
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(err = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if entry.depth() == 0 {
                continue;
            }
            let Some(rel) = relative_path(&self.root, entry.path()) else {
                debug!(path = %entry.path().display(), "skipping non-utf8 path");
                continue;
            };
            let file_type = entry.file_type();
            if file_type.is_dir() {
                snapshot.dirs.insert(rel);
                continue;
            }
            if !file_type.is_file() || !self.filter.is_tracked(&rel) {
                continue;
            }
            match fs::read(entry.path()).map(String::from_utf8) {
                Ok(Ok(text)) => {
                    snapshot.files.insert(rel, text);
                }
                Ok(Err(err)) => {
                    debug!(path = %rel, "skipping non-utf8 file");
                    snapshot.raw.insert(rel.clone(), err.into_bytes());
                    snapshot.skipped.insert(rel);
                }
                Err(err) => {
                    debug!(path = %rel, err = %err, "skipping unreadable file");
                    snapshot.skipped.insert(rel);
                }
            }
        }

        debug!(
            files = snapshot.files.len(),
            skipped = snapshot.skipped.len(),
            "snapshot captured"
        );
        snapshot
    }

    /// Return the tracked tree to `snapshot`, continuing past per-file failures.
    #[instrument(skip_all, fields(root = %self.root.display(), files = snapshot.len()))]
    pub fn restore(&self, snapshot: &Snapshot) -> RestoreReport {
        let current = self.capture();
        let mut report = RestoreReport::default();

        for (rel, content) in &snapshot.files {
            if current.get(rel) == Some(content.as_str()) {
                continue;
            }
            let path = self.root.join(rel);
            match write_with_parents(&path, content) {
                Ok(()) => report.rewritten.push(rel.clone()),
                Err(err) => {
                    warn!(path = %rel, err = %format!("{err:#}"), "failed to restore file");
                    report.failures.push(format!("restore {rel}: {err:#}"));
                }
            }
        }

        for (rel, bytes) in &snapshot.raw {
            let path = self.root.join(rel);
            if fs::read(&path).is_ok_and(|now| now == *bytes) {
                continue;
            }
            match write_with_parents(&path, bytes) {
                Ok(()) => report.rewritten.push(rel.clone()),
                Err(err) => {
                    warn!(path = %rel, err = %format!("{err:#}"), "failed to restore file");
                    report.failures.push(format!("restore {rel}: {err:#}"));
                }
            }
        }

        let created = current
            .files
            .keys()
            .chain(current.skipped.iter())
            .filter(|rel| !snapshot.knows(rel));
        for rel in created {
            match fs::remove_file(self.root.join(rel)) {
                Ok(()) => report.removed.push(rel.clone()),
                Err(err) => {
                    warn!(path = %rel, err = %err, "failed to remove created file");
                    report.failures.push(format!("remove {rel}: {err}"));
                }
            }
        }

        // Deepest first, so nested new directories empty out their parents.
        for rel in current.dirs.iter().rev() {
            if snapshot.dirs.contains(rel) {
                continue;
            }
            match fs::remove_dir(self.root.join(rel)) {
                Ok(()) => report.removed_dirs.push(rel.clone()),
                Err(err) => debug!(path = %rel, err = %err, "keeping non-empty directory"),
            }
        }

        debug!(
            rewritten = report.rewritten.len(),
            removed = report.removed.len(),
            failures = report.failures.len(),
            "restore finished"
        );
        report
    }
}

/// Build the tracked-file filter from config plus the root `.gitignore`.
pub fn load_filter(root: &Path, cfg: &FilterConfig) -> Result<FileFilter> {
    let mut ignore = cfg.ignore.clone();
    let gitignore = root.join(".gitignore");
    if cfg.use_gitignore && gitignore.is_file() {
        let contents = fs::read_to_string(&gitignore)
            .with_context(|| format!("read {}", gitignore.display()))?;
        ignore.extend(parse_ignore_lines(&contents));
    }
    FileFilter::new(&cfg.extensions, &ignore, &cfg.exclude_dirs)
        .context("compile filter.ignore patterns")
}

/// `/`-joined path of `path` relative to `root`, if representable.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

fn write_with_parents(path: &Path, content: impl AsRef<[u8]>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("write {}", path.display()))
}
