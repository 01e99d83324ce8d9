//! Transactional self-mutation engine.
//!
//! Each cycle snapshots the tracked files of a project, asks an external
//! proposer for one change, applies it, validates the result and either
//! commits or restores the snapshot. The architecture keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (proposal parsing, path rules,
//!   patching, syntax scans, stall bookkeeping). No I/O.
//! - **[`io`]**: Side-effecting operations (filesystem, child processes,
//!   audit log). Collaborators sit behind traits so tests can script them.
//!
//! [`cycle`] drives one transaction; [`looping`] and [`check`] build the CLI
//! commands on top of it.

pub mod check;
pub mod core;
pub mod cycle;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
