//! Stable exit codes for mutator CLI commands.

/// Command succeeded; every requested cycle completed (including rollbacks and skips).
pub const OK: i32 = 0;
/// Invalid startup: missing or invalid config, missing proposer command, unreadable state.
pub const INVALID: i32 = 1;
/// Another process holds the tree lock.
pub const LOCKED: i32 = 2;
/// `mutator check` found syntax or test failures.
pub const CHECK_FAILED: i32 = 3;
