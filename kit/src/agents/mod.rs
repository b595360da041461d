//! Agent collaborators invoked by workflow steps.
//!
//! The [`Agent`] trait decouples step orchestration from the backend that
//! actually does the work (an LLM CLI, a script). The engine only sees the
//! rendered prompt going in and an [`AgentOutcome`] coming out. Tests use
//! scripted agents that return predetermined outcomes without spawning
//! processes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::Value;
use tracing::debug;

use crate::io::config::KitConfig;
use crate::session::SessionContext;
use crate::workflow::Workflow;

pub mod command;

use command::CommandAgent;

/// Input for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Agent id the step names (the fallback id when running a fallback).
    pub agent: String,
    /// Rendered step instruction.
    pub prompt: String,
    pub task: String,
    /// Snapshot of the session context taken before the step (or group) started.
    pub context: SessionContext,
}

/// What an agent reports back.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutcome {
    pub success: bool,
    /// Free-text output; on failure this is the reason.
    pub output: String,
    /// Context writes applied at the next barrier when `success` is true.
    pub context_updates: Vec<(String, Value)>,
}

impl AgentOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            context_updates: Vec::new(),
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            output: reason.into(),
            context_updates: Vec::new(),
        }
    }

    pub fn with_update(mut self, key: &str, value: Value) -> Self {
        self.context_updates.push((key.to_string(), value));
        self
    }
}

/// Abstraction over agent backends.
///
/// An `Err` is treated like a failed outcome whose output is the error chain.
pub trait Agent: Send + Sync {
    fn invoke(&self, request: &AgentRequest) -> Result<AgentOutcome>;
}

/// Agent ids mapped to their implementations.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry of [`CommandAgent`]s from the `[agents]` config table.
    pub fn from_config(config: &KitConfig) -> Self {
        let mut registry = Self::new();
        for (id, agent) in &config.agents {
            let command = CommandAgent::new(
                agent.command.clone(),
                Duration::from_secs(agent.timeout_secs),
            );
            registry.register(id, Arc::new(command));
        }
        registry
    }

    /// Register (or replace) the implementation for `id`.
    pub fn register(&mut self, id: &str, agent: Arc<dyn Agent>) {
        debug!(agent = id, "registering agent");
        self.agents.insert(id.to_string(), agent);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.agents.contains_key(id)
    }

    /// Check every step and fallback agent of `workflow` is registered.
    ///
    /// The error names all missing ids, not just the first.
    pub fn resolve(&self, workflow: &Workflow) -> Result<()> {
        let missing: Vec<&str> = workflow
            .agent_ids()
            .into_iter()
            .filter(|id| !self.contains(id))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(anyhow!(
            "workflow '{}' references unregistered agents: {}",
            workflow.name,
            missing.join(", ")
        ))
    }
}
