//! Stable exit codes for `gemini-kit` commands.

/// Command succeeded (for `run`: the session ended `completed`).
pub const OK: i32 = 0;
/// Invalid input, config, or session id, or any other error.
pub const INVALID: i32 = 1;
/// `run` finished and the session ended `failed`.
pub const FAILED: i32 = 2;
