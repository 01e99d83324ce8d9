//! Deterministic, pure logic shared by the engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod canonical;
pub mod diff;
pub mod error;
pub mod filter;
pub mod patch;
pub mod path;
pub mod proposal;
pub mod stall;
pub mod syntax;
pub mod types;
