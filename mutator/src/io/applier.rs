//! Mutation applier: turns one [`ChangeProposal`] into filesystem writes.
//!
//! Every failure is reported as data in [`ApplyResult`]. Target paths of file
//! operations are all checked before the first write, so an escaping or
//! protected path rejects the whole proposal with the tree untouched.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};

use crate::core::error::ApplyError;
use crate::core::filter::FileFilter;
use crate::core::patch::apply_patch;
use crate::core::path::checked_relative;
use crate::core::proposal::{ChangeProposal, FileContent, FilePatch};
use crate::core::types::ApplyResult;
use crate::io::config::SandboxConfig;
use crate::io::sandbox::run_sandboxed;

/// Safety settings the applier enforces.
#[derive(Debug, Clone, Copy)]
pub struct ApplyEnv<'a> {
    pub protected: &'a [String],
    pub filter: &'a FileFilter,
    pub sandbox: &'a SandboxConfig,
}

/// Apply `proposal` to the tree under `root`.
#[instrument(skip_all, fields(root = %root.display(), proposal = %proposal.summary()))]
pub fn apply(root: &Path, proposal: &ChangeProposal, env: &ApplyEnv<'_>) -> ApplyResult {
    let targets = match resolve_targets(root, proposal, env) {
        Ok(targets) => targets,
        Err(err) => {
            warn!(err = %err, "proposal rejected before apply");
            return ApplyResult::failure(err);
        }
    };

    let mut result = ApplyResult::success();
    let outcome = match proposal {
        ChangeProposal::FileWrite { files } => write_files(root, files, &targets, &mut result),
        ChangeProposal::FileAppend { files } => append_files(root, files, &targets, &mut result),
        ChangeProposal::TextPatch { patches } => {
            patch_files(root, patches, &targets, &mut result)
        }
        ChangeProposal::ExecutableCode { source_text } => {
            run_sandboxed(root, source_text, env.sandbox)
        }
        ChangeProposal::NoOp | ChangeProposal::HumanHelp { .. } => Ok(()),
    };

    if let Err(err) = outcome {
        warn!(err = %err, "apply failed");
        result.ok = false;
        result.error = Some(err);
    }
    result
}

/// Normalize and check every target path, in proposal order.
fn resolve_targets(
    root: &Path,
    proposal: &ChangeProposal,
    env: &ApplyEnv<'_>,
) -> Result<Vec<String>, ApplyError> {
    proposal
        .target_paths()
        .into_iter()
        .map(|raw| {
            let rel = checked_relative(raw, env.protected)?;
            if !env.filter.is_tracked(&rel) {
                return Err(ApplyError::Untracked(rel));
            }
            ensure_no_escaping_links(root, &rel)?;
            Ok(rel)
        })
        .collect()
}

/// Reject `rel` if any existing prefix is a symlink that leaves `root`.
fn ensure_no_escaping_links(root: &Path, rel: &str) -> Result<(), ApplyError> {
    let canonical_root = root
        .canonicalize()
        .map_err(|err| io_error(&root.display().to_string(), &err))?;
    let mut current = PathBuf::from(root);
    for part in rel.split('/') {
        current.push(part);
        let Ok(meta) = fs::symlink_metadata(&current) else {
            break;
        };
        if !meta.file_type().is_symlink() {
            continue;
        }
        match current.canonicalize() {
            Ok(target) if target.starts_with(&canonical_root) => {}
            _ => return Err(ApplyError::PathEscape(rel.to_string())),
        }
    }
    Ok(())
}

fn write_files(
    root: &Path,
    files: &[FileContent],
    targets: &[String],
    result: &mut ApplyResult,
) -> Result<(), ApplyError> {
    for (file, rel) in files.iter().zip(targets) {
        let path = root.join(rel);
        create_parents(&path, rel)?;
        fs::write(&path, &file.content).map_err(|err| io_error(rel, &err))?;
        debug!(path = %rel, bytes = file.content.len(), "wrote file");
        touch(result, rel);
    }
    Ok(())
}

fn append_files(
    root: &Path,
    files: &[FileContent],
    targets: &[String],
    result: &mut ApplyResult,
) -> Result<(), ApplyError> {
    for (file, rel) in files.iter().zip(targets) {
        let path = root.join(rel);
        create_parents(&path, rel)?;
        let mut handle = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| io_error(rel, &err))?;
        handle
            .write_all(file.content.as_bytes())
            .map_err(|err| io_error(rel, &err))?;
        debug!(path = %rel, bytes = file.content.len(), "appended to file");
        touch(result, rel);
    }
    Ok(())
}

fn patch_files(
    root: &Path,
    patches: &[FilePatch],
    targets: &[String],
    result: &mut ApplyResult,
) -> Result<(), ApplyError> {
    for (patch, rel) in patches.iter().zip(targets) {
        let path = root.join(rel);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ApplyError::NotFound(rel.clone()));
            }
            Err(err) => return Err(io_error(rel, &err)),
        };
        let patched = apply_patch(&text, &patch.search, &patch.replace, patch.count).map_err(
            |err| ApplyError::InvalidPattern {
                path: rel.clone(),
                message: err.to_string(),
            },
        )?;
        if patched.replaced == 0 {
            warn!(path = %rel, pattern = %patch.search, "patch matched nothing");
            result
                .warnings
                .push(format!("{rel}: pattern `{}` matched nothing", patch.search));
            continue;
        }
        fs::write(&path, &patched.text).map_err(|err| io_error(rel, &err))?;
        debug!(path = %rel, replaced = patched.replaced, "patched file");
        touch(result, rel);
    }
    Ok(())
}

fn create_parents(path: &Path, rel: &str) -> Result<(), ApplyError> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent).map_err(|err| io_error(rel, &err)),
        None => Ok(()),
    }
}

fn touch(result: &mut ApplyResult, rel: &str) {
    if !result.touched.iter().any(|t| t == rel) {
        result.touched.push(rel.to_string());
    }
}

fn io_error(path: &str, err: &std::io::Error) -> ApplyError {
    ApplyError::Io {
        path: path.to_string(),
        message: err.to_string(),
    }
}
