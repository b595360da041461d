//! Agent backed by an external command.

use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{info, instrument, warn};

use super::{Agent, AgentOutcome, AgentRequest};
use crate::error::KitError;
use crate::io::process::{DEFAULT_OUTPUT_LIMIT_BYTES, run_command_with_timeout};

/// Runs `command` with the rendered prompt on stdin.
///
/// Exit 0 is a success whose output is stdout. Any other exit, or a timeout,
/// is reported as [`KitError::CommandFailed`] carrying stderr. The agent id is
/// exported to the child as `GEMINI_KIT_AGENT`.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandAgent {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self {
            command,
            timeout,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }

    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit_bytes = bytes;
        self
    }
}

impl Agent for CommandAgent {
    #[instrument(skip_all, fields(agent = %request.agent, timeout_secs = self.timeout.as_secs()))]
    fn invoke(&self, request: &AgentRequest) -> Result<AgentOutcome> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("agent '{}' has an empty command", request.agent))?;
        let label = self.command.join(" ");

        let mut cmd = Command::new(program);
        cmd.args(args).env("GEMINI_KIT_AGENT", &request.agent);
        info!(command = %label, "invoking command agent");

        let output = run_command_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .map_err(|err| KitError::CommandFailed {
            command: label.clone(),
            exit_code: None,
            stderr: format!("{err:#}"),
            timed_out: false,
        })?;

        if output.success() {
            return Ok(AgentOutcome::success(output.stdout_lossy().trim_end()));
        }
        warn!(
            command = %label,
            exit_code = ?output.status.code(),
            timed_out = output.timed_out,
            "command agent failed"
        );
        let mut stderr = output.stderr_lossy().trim().to_string();
        if output.timed_out && stderr.is_empty() {
            stderr = format!("timed out after {} s", self.timeout.as_secs());
        }
        Err(KitError::CommandFailed {
            command: label,
            exit_code: if output.timed_out { None } else { output.status.code() },
            stderr,
            timed_out: output.timed_out,
        }
        .into())
    }
}
