//! Domain error kinds surfaced by the kit.
//!
//! Functions return `anyhow::Result`; these variants are raised where callers
//! need to classify a failure (`err.downcast_ref::<KitError>()`).

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KitError {
    /// A candidate path resolved outside the permitted base directory.
    #[error("path '{}' resolves outside of '{}'", .path.display(), .base.display())]
    PathTraversal { path: PathBuf, base: PathBuf },

    /// An external process exited non-zero, timed out, or could not be spawned.
    #[error("{command} failed{}: {stderr}", exit_suffix(.exit_code, .timed_out))]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
        timed_out: bool,
    },

    /// The operation needs an active session and there is none.
    #[error("no active session")]
    SessionNotFound,

    /// A session id failed validation before it was used as a path component.
    #[error("invalid session id '{0}'")]
    InvalidSessionId(String),

    /// A step exhausted its retries without succeeding.
    #[error("retry budget exhausted for '{agent}' after {retries} retries")]
    RetryBudgetExhausted { agent: String, retries: u32 },
}

fn exit_suffix(exit_code: &Option<i32>, timed_out: &bool) -> String {
    if *timed_out {
        return " (timed out)".to_string();
    }
    match exit_code {
        Some(code) => format!(" (exit {code})"),
        None => String::new(),
    }
}

impl KitError {
    /// Captured stderr for command failures.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            KitError::CommandFailed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}
