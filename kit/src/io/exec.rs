//! `git` / `gh` execution with argument-vector semantics and explicit timeouts.
//!
//! Arguments are handed to the child verbatim; nothing here goes through a
//! shell. Failures (non-zero exit, timeout, spawn error) surface as
//! [`KitError::CommandFailed`] carrying captured stderr.

use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, instrument, warn};

use crate::error::KitError;
use crate::io::process::{DEFAULT_OUTPUT_LIMIT_BYTES, run_command_with_timeout};

pub const GIT_TIMEOUT_ENV: &str = "GEMINI_KIT_GIT_TIMEOUT";
pub const GH_TIMEOUT_ENV: &str = "GEMINI_KIT_GH_TIMEOUT";
pub const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_millis(30_000);
pub const DEFAULT_GH_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Per-call execution options.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Working directory for the child; inherits the current one when `None`.
    pub cwd: Option<PathBuf>,
    /// Overrides the environment/default timeout.
    pub timeout: Option<Duration>,
}

impl ExecOptions {
    pub fn in_dir(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: Some(cwd.into()),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Run `git` with `args` and return its stdout.
pub fn run_git<S: AsRef<OsStr>>(args: &[S], options: &ExecOptions) -> Result<String> {
    let timeout = options
        .timeout
        .unwrap_or_else(|| env_timeout(GIT_TIMEOUT_ENV, DEFAULT_GIT_TIMEOUT));
    run_tool("git", args, options.cwd.as_deref(), timeout)
}

/// Run the GitHub CLI (`gh`) with `args` and return its stdout.
pub fn run_gh<S: AsRef<OsStr>>(args: &[S], options: &ExecOptions) -> Result<String> {
    let timeout = options
        .timeout
        .unwrap_or_else(|| env_timeout(GH_TIMEOUT_ENV, DEFAULT_GH_TIMEOUT));
    run_tool("gh", args, options.cwd.as_deref(), timeout)
}

#[instrument(skip_all, fields(program = %program, timeout_ms = timeout.as_millis() as u64))]
fn run_tool<S: AsRef<OsStr>>(
    program: &str,
    args: &[S],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<String> {
    let label = describe(program, args);
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let output = match run_command_with_timeout(cmd, None, timeout, DEFAULT_OUTPUT_LIMIT_BYTES) {
        Ok(output) => output,
        Err(err) => {
            return Err(KitError::CommandFailed {
                command: label,
                exit_code: None,
                stderr: format!("{err:#}"),
                timed_out: false,
            }
            .into());
        }
    };

    if output.timed_out {
        warn!(command = %label, "command timed out");
        let mut stderr = output.stderr_lossy();
        if stderr.trim().is_empty() {
            stderr = format!("timed out after {} ms", timeout.as_millis());
        }
        return Err(KitError::CommandFailed {
            command: label,
            exit_code: None,
            stderr,
            timed_out: true,
        }
        .into());
    }
    if !output.status.success() {
        let stderr = output.stderr_lossy();
        warn!(command = %label, exit_code = ?output.status.code(), "command failed");
        return Err(KitError::CommandFailed {
            command: label,
            exit_code: output.status.code(),
            stderr: stderr.trim().to_string(),
            timed_out: false,
        }
        .into());
    }

    debug!(command = %label, "command succeeded");
    Ok(output.stdout_lossy())
}

fn describe<S: AsRef<OsStr>>(program: &str, args: &[S]) -> String {
    let mut label = program.to_string();
    for arg in args {
        label.push(' ');
        label.push_str(&arg.as_ref().to_string_lossy());
    }
    label
}

fn env_timeout(var: &str, default: Duration) -> Duration {
    parse_timeout_ms(env::var(var).ok().as_deref(), var, default)
}

/// Parse a millisecond timeout override; invalid or zero values keep `default`.
pub fn parse_timeout_ms(raw: Option<&str>, var: &str, default: Duration) -> Duration {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return default;
    };
    match raw.parse::<u64>() {
        Ok(ms) if ms > 0 => Duration::from_millis(ms),
        _ => {
            warn!(var, value = raw, "ignoring invalid timeout override");
            default
        }
    }
}

/// True if `name` resolves to an executable on `PATH`.
///
/// Checks the filesystem directly instead of spawning `which`/`where`.
pub fn command_exists(name: &str) -> bool {
    if name.is_empty() || name.contains(['/', '\\']) {
        return Path::new(name).is_file();
    }
    let Some(paths) = env::var_os("PATH") else {
        return false;
    };
    env::split_paths(&paths).any(|dir| candidates(&dir, name).iter().any(|p| is_executable(p)))
}

#[cfg(windows)]
fn candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    let exts = env::var("PATHEXT").unwrap_or_else(|_| ".COM;.EXE;.BAT;.CMD".to_string());
    let mut out = vec![dir.join(name)];
    out.extend(
        exts.split(';')
            .filter(|e| !e.is_empty())
            .map(|ext| dir.join(format!("{name}{ext}"))),
    );
    out
}

#[cfg(not(windows))]
fn candidates(dir: &Path, name: &str) -> Vec<PathBuf> {
    vec![dir.join(name)]
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
