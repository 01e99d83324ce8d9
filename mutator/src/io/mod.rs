//! I/O helpers for engine commands.

pub mod applier;
pub mod audit;
pub mod config;
pub mod cycle_log;
pub mod goal;
pub mod init;
pub mod lock;
pub mod process;
pub mod prompt;
pub mod sandbox;
pub mod snapshot;
pub mod source;
pub mod stall_store;
pub mod validator;
