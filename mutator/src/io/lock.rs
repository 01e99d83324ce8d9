//! Advisory lock that serializes cycles on one project root.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use tracing::{debug, warn};

use crate::core::error::CycleStartError;

/// Exclusive lock on `.mutator/lock`, released on drop.
#[derive(Debug)]
pub struct TreeLock {
    file: File,
    path: PathBuf,
}

impl TreeLock {
    /// Take the lock without blocking.
    ///
    /// A lock held by another process is reported as [`CycleStartError::Locked`].
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .with_context(|| format!("open lock file {}", path.display()))?;
        if file.try_lock_exclusive().is_err() {
            return Err(CycleStartError::Locked {
                path: path.display().to_string(),
            }
            .into());
        }
        debug!(path = %path.display(), "tree lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for TreeLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), err = %err, "failed to release tree lock");
        } else {
            debug!(path = %self.path.display(), "tree lock released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".mutator").join("lock");

        let held = TreeLock::acquire(&path).expect("first lock");
        let err = TreeLock::acquire(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CycleStartError>(),
            Some(CycleStartError::Locked { .. })
        ));

        drop(held);
        TreeLock::acquire(&path).expect("lock after release");
    }
}
