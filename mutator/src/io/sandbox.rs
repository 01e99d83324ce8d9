//! Restricted child process for `ExecutableCode` proposals.
//!
//! The source is passed to the interpreter on stdin; the child gets the project
//! root as working directory and a cleared environment. Optional isolation is
//! layered on with `sandbox.wrapper` (for example a namespace launcher).

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::core::error::ApplyError;
use crate::io::config::SandboxConfig;
use crate::io::process::run_command_with_timeout;

/// Run `source_text` in the sandboxed worker.
#[instrument(skip_all, fields(bytes = source_text.len(), timeout_secs = cfg.timeout_secs))]
pub fn run_sandboxed(root: &Path, source_text: &str, cfg: &SandboxConfig) -> Result<(), ApplyError> {
    if !cfg.enabled {
        return Err(ApplyError::ExecutionDisabled);
    }
    let argv: Vec<&String> = cfg.wrapper.iter().chain(cfg.interpreter.iter()).collect();
    let Some((program, args)) = argv.split_first() else {
        return Err(ApplyError::Execution("sandbox interpreter is empty".to_string()));
    };

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(root)
        .env_clear()
        .env("PATH", &cfg.path_env)
        .env("HOME", root)
        .env("TMPDIR", std::env::temp_dir())
        .env("MUTATOR_ROOT", root);

    info!("running executable proposal in sandbox");
    let output = run_command_with_timeout(
        cmd,
        Some(source_text.as_bytes()),
        Duration::from_secs(cfg.timeout_secs),
        cfg.output_limit_bytes,
    )
    .map_err(|err| ApplyError::Execution(format!("{err:#}")))?;

    if output.success() {
        return Ok(());
    }
    warn!(exit = %output.exit_description(), "sandboxed code failed");
    let detail = output.last_line();
    Err(ApplyError::Execution(if detail.is_empty() {
        output.exit_description()
    } else {
        format!("{}: {detail}", output.exit_description())
    }))
}
