//! Test-only helpers: scripted agents, step/workflow builders, temp stores.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Result, anyhow};

use crate::agents::{Agent, AgentOutcome, AgentRegistry, AgentRequest};
use crate::io::session_store::{SessionStore, StoreOptions};
use crate::workflow::{Workflow, WorkflowStep};

/// Agent that replays a queue of scripted outcomes.
///
/// Each invocation pops the next entry; an empty queue is an error so an
/// unexpected extra call fails the run instead of passing silently.
#[derive(Default)]
pub struct ScriptedAgent {
    script: Mutex<VecDeque<Result<AgentOutcome, String>>>,
    requests: Mutex<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new(outcomes: impl IntoIterator<Item = AgentOutcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(outcomes.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Queue an invocation that returns `Err(message)`.
    pub fn push_error(&self, message: &str) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Err(message.to_string()));
    }

    pub fn calls(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Requests received so far, in call order.
    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn assert_drained(&self) {
        let left = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        assert_eq!(left, 0, "scripted agent has {left} unused outcomes");
    }
}

impl Agent for ScriptedAgent {
    fn invoke(&self, request: &AgentRequest) -> Result<AgentOutcome> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match next {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted outcome left for '{}'", request.agent)),
        }
    }
}

/// Registry holding the given scripted agents.
pub fn registry(agents: &[(&str, &Arc<ScriptedAgent>)]) -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    for &(id, agent) in agents {
        let agent: Arc<dyn Agent> = agent.clone();
        registry.register(id, agent);
    }
    registry
}

/// Required step with an abort policy and a generated description.
pub fn step(agent: &str) -> WorkflowStep {
    WorkflowStep::new(agent, &format!("{agent} step"))
}

pub fn workflow(name: &str, steps: Vec<WorkflowStep>) -> Workflow {
    Workflow::new(name, &format!("{name} workflow"), steps)
}

/// Store writing into a fresh temp dir, without background saves.
///
/// Keep the returned `TempDir` alive for as long as the store is used.
pub fn temp_store() -> (tempfile::TempDir, SessionStore) {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = SessionStore::new(StoreOptions::new(temp.path().join("sessions")).auto_save(false))
        .expect("session store");
    (temp, store)
}
