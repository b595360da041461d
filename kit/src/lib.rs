//! Multi-agent workflow kit: step orchestration over a persisted team session.
//!
//! The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (input sanitizing, session ids,
//!   workflow selection scoring, retry budgets). No I/O.
//! - **[`io`]**: Side-effecting operations (git/gh subprocesses, path checks,
//!   file discovery, config, session persistence, prompt rendering).
//!
//! [`workflow`] and [`session`] hold the data model, [`agents`] the collaborator
//! boundary, and [`engine`] coordinates them to run a workflow end to end.

pub mod agents;
pub mod core;
pub mod engine;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workflow;
