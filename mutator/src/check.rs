//! `mutator check`: run the validator against the current tree.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;

use crate::core::types::ValidationResult;
use crate::io::config::load_config;
use crate::io::init::EnginePaths;
use crate::io::lock::TreeLock;
use crate::io::snapshot::{SnapshotStore, load_filter};
use crate::io::validator::{TestRunner, ValidateRequest, validate};

/// Validate the tree without mutating it. The test log goes to `.mutator/check/tests.log`.
pub fn check_tree<T: TestRunner>(root: &Path, tests: &T) -> Result<ValidationResult> {
    let paths = EnginePaths::new(root);
    paths.ensure_initialized()?;
    let cfg = load_config(&paths.config_path)?;
    let _lock = TreeLock::acquire(&paths.lock_path)?;
    let store = SnapshotStore::new(root, load_filter(root, &cfg.filter)?);
    let tree = store.capture();
    let log_path = paths.engine_dir.join("check").join("tests.log");

    Ok(validate(
        &ValidateRequest {
            root,
            tree: &tree,
            cfg: &cfg.validate,
            test_timeout: Duration::from_secs(cfg.cycle_timeout_secs),
            test_log_path: &log_path,
        },
        tests,
    ))
}
