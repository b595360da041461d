//! Deterministic, pure logic shared by the kit.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod sanitize;
pub mod selector;
pub mod session_id;
