//! Persistence for [`StallState`] (`.mutator/state/stall.json`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use super::config::write_atomic;
use crate::core::stall::StallState;

/// Load stall state from disk; a missing file is a fresh state.
pub fn load_stall_state(path: &Path) -> Result<StallState> {
    debug!(path = %path.display(), "loading stall state");
    if !path.exists() {
        return Ok(StallState::default());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read stall state {}", path.display()))?;
    let state: StallState = serde_json::from_str(&contents)
        .with_context(|| format!("parse stall state {}", path.display()))?;
    debug!(
        next_cycle = state.next_cycle,
        failures = state.consecutive_failures,
        "stall state loaded"
    );
    Ok(state)
}

/// Atomically write stall state to disk (temp file + rename).
pub fn write_stall_state(path: &Path, state: &StallState) -> Result<()> {
    debug!(
        path = %path.display(),
        next_cycle = state.next_cycle,
        failures = state.consecutive_failures,
        "writing stall state"
    );
    let mut buf = serde_json::to_string_pretty(state)?;
    buf.push('\n');
    write_atomic(path, &buf, "json.tmp")
}
