//! Team session records persisted by the session store.
//!
//! A [`TeamSession`] is the audit trail of one multi-agent task run. Field
//! names serialize in camelCase so the on-disk document matches the session
//! file format (`id`, `name`, `goal`, `startTime`, `endTime`, `status`,
//! `agents`, `context`, `workflowType`, `retryCount`, `maxRetries`).

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Shared key/value context; last write wins.
pub type SessionContext = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        self != SessionStatus::Active
    }
}

/// Outcome recorded for one step execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Failure,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResult {
    /// Name of the step agent that produced this result.
    pub agent: String,
    pub status: ResultStatus,
    pub output: String,
    /// RFC 3339 time the result was recorded.
    pub timestamp: String,
    /// Elapsed milliseconds for the attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

impl AgentResult {
    pub fn new(agent: impl Into<String>, status: ResultStatus, output: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            status,
            output: output.into(),
            timestamp: now_timestamp(),
            duration: None,
        }
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration = Some(duration_ms);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamSession {
    pub id: String,
    pub name: String,
    pub goal: String,
    pub start_time: String,
    #[serde(default)]
    pub end_time: Option<String>,
    pub status: SessionStatus,
    /// Append-only, in execution order.
    #[serde(default)]
    pub agents: Vec<AgentResult>,
    #[serde(default)]
    pub context: SessionContext,
    #[serde(default)]
    pub workflow_type: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    pub max_retries: u32,
}

impl TeamSession {
    pub fn new(id: String, goal: &str, name: Option<&str>, max_retries: u32) -> Self {
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| default_name(goal));
        Self {
            id,
            name,
            goal: goal.to_string(),
            start_time: now_timestamp(),
            end_time: None,
            status: SessionStatus::Active,
            agents: Vec::new(),
            context: SessionContext::new(),
            workflow_type: None,
            retry_count: 0,
            max_retries,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Wall-clock duration between start and end (or now, if still active).
    pub fn duration_ms(&self) -> Option<u64> {
        let start = parse_timestamp(&self.start_time)?;
        let end = match &self.end_time {
            Some(end) => parse_timestamp(end)?,
            None => Utc::now(),
        };
        let ms = (end - start).num_milliseconds();
        u64::try_from(ms).ok()
    }
}

fn default_name(goal: &str) -> String {
    const MAX: usize = 48;
    let trimmed = goal.trim();
    if trimmed.chars().count() <= MAX {
        return trimmed.to_string();
    }
    let mut name: String = trimmed.chars().take(MAX).collect();
    name.push_str("...");
    name
}

/// Current UTC time, RFC 3339 with millisecond precision.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Human-readable digest of a session: goal, agent outcomes, duration.
pub fn summarize(session: &TeamSession) -> String {
    let mut buf = String::new();
    let _ = writeln!(buf, "Session {} ({})", session.id, session.status.as_str());
    let _ = writeln!(buf, "Name: {}", session.name);
    let _ = writeln!(buf, "Goal: {}", session.goal);
    if let Some(workflow) = &session.workflow_type {
        let _ = writeln!(buf, "Workflow: {workflow}");
    }

    let succeeded = session
        .agents
        .iter()
        .filter(|r| r.status == ResultStatus::Success)
        .count();
    let failed = session
        .agents
        .iter()
        .filter(|r| r.status == ResultStatus::Failure)
        .count();
    let _ = writeln!(
        buf,
        "Agents: {} results ({succeeded} succeeded, {failed} failed), retries {}/{}",
        session.agents.len(),
        session.retry_count,
        session.max_retries
    );
    for result in &session.agents {
        let mark = match result.status {
            ResultStatus::Success => "ok",
            ResultStatus::Failure => "FAIL",
            ResultStatus::Pending => "..",
        };
        let _ = write!(buf, "  [{mark}] {}", result.agent);
        if let Some(ms) = result.duration {
            let _ = write!(buf, " ({ms} ms)");
        }
        buf.push('\n');
    }

    match session.duration_ms() {
        Some(ms) => {
            let _ = writeln!(buf, "Duration: {}", format_duration_ms(ms));
        }
        None => buf.push_str("Duration: unknown\n"),
    }
    buf
}

fn format_duration_ms(ms: u64) -> String {
    if ms < 1_000 {
        return format!("{ms}ms");
    }
    let secs = ms / 1_000;
    if secs < 60 {
        return format!("{}.{:01}s", secs, (ms % 1_000) / 100);
    }
    format!("{}m {}s", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_serializes_with_camel_case_fields() {
        let mut session = TeamSession::new("s-1".to_string(), "ship it", None, 3);
        session.agents.push(AgentResult::new("coder", ResultStatus::Success, "done"));
        let value = serde_json::to_value(&session).expect("serialize");
        let obj = value.as_object().expect("object");
        for key in [
            "id",
            "name",
            "goal",
            "startTime",
            "endTime",
            "status",
            "agents",
            "context",
            "workflowType",
            "retryCount",
            "maxRetries",
        ] {
            assert!(obj.contains_key(key), "missing {key}");
        }
        assert_eq!(obj["status"], "active");
        assert_eq!(obj["agents"][0]["status"], "success");
    }

    #[test]
    fn default_name_truncates_long_goals() {
        let goal = "x".repeat(100);
        let session = TeamSession::new("s".to_string(), &goal, None, 1);
        assert!(session.name.ends_with("..."));
        assert_eq!(session.name.chars().count(), 51);

        let named = TeamSession::new("s".to_string(), &goal, Some("  short  "), 1);
        assert_eq!(named.name, "short");
    }

    #[test]
    fn can_retry_respects_ceiling() {
        let mut session = TeamSession::new("s".to_string(), "g", None, 2);
        assert!(session.can_retry());
        session.retry_count = 2;
        assert!(!session.can_retry());
    }

    #[test]
    fn summary_lists_outcomes_and_duration() {
        let mut session = TeamSession::new("s-9".to_string(), "ship feature X", None, 3);
        session.start_time = "2024-01-01T00:00:00.000Z".to_string();
        session.end_time = Some("2024-01-01T00:01:05.000Z".to_string());
        session.status = SessionStatus::Completed;
        session
            .agents
            .push(AgentResult::new("planner", ResultStatus::Success, "plan").with_duration_ms(12));
        session
            .agents
            .push(AgentResult::new("tester", ResultStatus::Failure, "boom"));

        let summary = summarize(&session);
        assert!(summary.contains("Session s-9 (completed)"));
        assert!(summary.contains("Goal: ship feature X"));
        assert!(summary.contains("2 results (1 succeeded, 1 failed)"));
        assert!(summary.contains("[ok] planner (12 ms)"));
        assert!(summary.contains("[FAIL] tester"));
        assert!(summary.contains("Duration: 1m 5s"));
    }
}
