//! I/O layer: subprocesses, filesystem, persistence, and prompt rendering.

pub mod config;
pub mod exec;
pub mod find;
pub mod git;
pub mod paths;
pub mod process;
pub mod prompt;
pub mod session_store;
