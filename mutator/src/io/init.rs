//! Layout and scaffolding of the engine's `.mutator/` directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{EngineConfig, write_config};
use super::stall_store::write_stall_state;
use crate::core::stall::StallState;

/// All canonical paths within `.mutator/` for a project root.
#[derive(Debug, Clone)]
pub struct EnginePaths {
    pub root: PathBuf,
    pub engine_dir: PathBuf,
    pub state_dir: PathBuf,
    pub cycles_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub goal_path: PathBuf,
    pub config_path: PathBuf,
    pub stall_path: PathBuf,
    pub audit_path: PathBuf,
    pub lock_path: PathBuf,
}

impl EnginePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let engine_dir = root.join(".mutator");
        let state_dir = engine_dir.join("state");
        Self {
            root: root.clone(),
            engine_dir: engine_dir.clone(),
            state_dir: state_dir.clone(),
            cycles_dir: engine_dir.join("cycles"),
            gitignore_path: engine_dir.join(".gitignore"),
            goal_path: engine_dir.join("GOAL.md"),
            config_path: engine_dir.join("config.toml"),
            stall_path: state_dir.join("stall.json"),
            audit_path: engine_dir.join("audit.jsonl"),
            lock_path: engine_dir.join("lock"),
        }
    }

    /// Fail unless `mutator init` has been run for this root.
    pub fn ensure_initialized(&self) -> Result<()> {
        if !self.engine_dir.is_dir() {
            return Err(anyhow!(
                "{} not found (run `mutator init` first)",
                self.engine_dir.display()
            ));
        }
        Ok(())
    }
}

/// Options for `init_engine`.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// If true, overwrite existing engine-owned files.
    pub force: bool,
    /// Initial goal text for `GOAL.md`.
    pub goal: Option<String>,
}

/// Create `.mutator/` scaffolding in `root`.
///
/// Fails if `.mutator/` already exists unless `options.force` is set.
pub fn init_engine(root: &Path, options: &InitOptions) -> Result<EnginePaths> {
    let paths = EnginePaths::new(root);
    if paths.engine_dir.exists() && !paths.engine_dir.is_dir() {
        return Err(anyhow!(
            "mutator init: .mutator exists but is not a directory"
        ));
    }
    if paths.engine_dir.exists() && !options.force {
        return Err(anyhow!(
            "mutator init: .mutator already exists (use --force to overwrite)"
        ));
    }

    create_dir(&paths.engine_dir)?;
    create_dir(&paths.state_dir)?;
    create_dir(&paths.cycles_dir)?;

    write_file(&paths.gitignore_path, ENGINE_GITIGNORE)?;
    write_file(&paths.goal_path, &goal_document(options.goal.as_deref()))?;
    write_config(&paths.config_path, &EngineConfig::default())?;
    write_stall_state(&paths.stall_path, &StallState::default())?;

    Ok(paths)
}

fn goal_document(goal: Option<&str>) -> String {
    match goal.map(str::trim).filter(|g| !g.is_empty()) {
        Some(goal) => format!("# Goal\n\n{goal}\n"),
        None => GOAL_PLACEHOLDER.to_string(),
    }
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

const GOAL_PLACEHOLDER: &str = "# Goal\n\nDescribe what the agent should improve here.\n";
const ENGINE_GITIGNORE: &str = "cycles/\nlock\nstate/\naudit.jsonl\n";
