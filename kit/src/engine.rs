//! Workflow execution against the current team session.
//!
//! Steps run in order. Adjacent steps marked `parallel` form a group that runs
//! concurrently on scoped threads, each reading the same context snapshot. A
//! step never writes to the session directly: its agent results, retries, and
//! context updates are buffered and merged at the barrier in logical step
//! order, then the session is flushed before the next agent is invoked.

use std::thread;
use std::time::Instant;

use anyhow::{Result, anyhow};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::agents::{AgentOutcome, AgentRegistry, AgentRequest};
use crate::core::budget::RetryBudget;
use crate::error::KitError;
use crate::io::prompt::get_step_prompt;
use crate::io::session_store::SessionStore;
use crate::session::{AgentResult, ResultStatus, SessionContext, SessionStatus, TeamSession};
use crate::workflow::{OnFailure, Workflow, WorkflowStep};

/// How a step ended once its failure policy was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDisposition {
    Succeeded,
    Failed,
    /// Condition was false; nothing ran and nothing was recorded.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub agent: String,
    pub disposition: StepDisposition,
}

/// Final session plus a per-step summary, in logical step order.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub session: TeamSession,
    pub steps: Vec<StepRecord>,
}

impl RunOutcome {
    pub fn completed(&self) -> bool {
        self.session.status == SessionStatus::Completed
    }
}

/// Everything one step produced, buffered until the barrier.
#[derive(Debug)]
struct StepRun {
    results: Vec<AgentResult>,
    retries: u32,
    /// Output and context updates of the successful attempt.
    success: Option<AgentOutcome>,
    /// The workflow must stop after this step.
    halt: bool,
}

/// Start a session for `task` and execute `workflow` in it.
///
/// Agents are resolved before the session starts, so a workflow naming an
/// unregistered agent leaves no session behind.
#[instrument(skip_all, fields(workflow = %workflow.name))]
pub fn run_workflow(
    store: &SessionStore,
    agents: &AgentRegistry,
    workflow: &Workflow,
    task: &str,
) -> Result<RunOutcome> {
    agents.resolve(workflow)?;
    store.start_session(task, None)?;
    execute_workflow(store, agents, workflow, task)
}

/// Execute `workflow` in the store's current session and end the session.
///
/// The session ends `completed` unless a step's resolved outcome halts the run,
/// in which case it ends `failed` and no later step executes.
#[instrument(skip_all, fields(workflow = %workflow.name))]
pub fn execute_workflow(
    store: &SessionStore,
    agents: &AgentRegistry,
    workflow: &Workflow,
    task: &str,
) -> Result<RunOutcome> {
    agents.resolve(workflow)?;
    if store.current_session().is_none() {
        return Err(KitError::SessionNotFound.into());
    }
    store.set_workflow(&workflow.name, workflow.max_retries)?;
    info!(steps = workflow.steps.len(), "executing workflow");

    let mut records = Vec::with_capacity(workflow.steps.len());
    let mut halted = false;

    for group in step_groups(&workflow.steps) {
        let session = store.current_session().ok_or(KitError::SessionNotFound)?;
        let snapshot = session.context;
        let budget = RetryBudget::new(session.retry_count, session.max_retries);

        let runnable: Vec<&WorkflowStep> = group
            .iter()
            .filter(|step| {
                step.condition
                    .as_ref()
                    .is_none_or(|condition| condition.evaluate(&snapshot))
            })
            .collect();

        let runs: Vec<StepRun> = if runnable.len() > 1 {
            debug!(size = runnable.len(), "running parallel group");
            thread::scope(|scope| {
                let handles: Vec<_> = runnable
                    .iter()
                    .map(|step| {
                        let ctx = StepCtx {
                            agents,
                            workflow,
                            task,
                            snapshot: &snapshot,
                            budget: &budget,
                        };
                        scope.spawn(move || ctx.run(step))
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| {
                        handle
                            .join()
                            .map_err(|_| anyhow!("parallel step thread panicked"))
                    })
                    .collect::<Result<Vec<_>>>()
            })?
        } else {
            let ctx = StepCtx {
                agents,
                workflow,
                task,
                snapshot: &snapshot,
                budget: &budget,
            };
            runnable.iter().map(|step| ctx.run(step)).collect()
        };

        // Barrier: merge in logical order.
        let mut runs = runs.into_iter();
        for step in group {
            let ran = runnable.iter().any(|r| std::ptr::eq(*r, step));
            if !ran {
                debug!(agent = %step.agent, "condition false, skipping step");
                records.push(StepRecord {
                    agent: step.agent.clone(),
                    disposition: StepDisposition::Skipped,
                });
                continue;
            }
            let run = runs
                .next()
                .ok_or_else(|| anyhow!("missing result for step '{}'", step.agent))?;
            let disposition = merge_step(store, step, run.results, run.retries, run.success)?;
            records.push(StepRecord {
                agent: step.agent.clone(),
                disposition,
            });
            halted |= run.halt;
        }
        store.flush_session()?;

        if halted {
            warn!("step failure halted the workflow");
            break;
        }
    }

    let status = if halted {
        SessionStatus::Failed
    } else {
        SessionStatus::Completed
    };
    let session = store
        .end_session(status)?
        .ok_or(KitError::SessionNotFound)?;
    info!(session_id = %session.id, status = status.as_str(), "workflow finished");
    Ok(RunOutcome {
        session,
        steps: records,
    })
}

fn merge_step(
    store: &SessionStore,
    step: &WorkflowStep,
    results: Vec<AgentResult>,
    retries: u32,
    success: Option<AgentOutcome>,
) -> Result<StepDisposition> {
    for result in results {
        store.add_agent_result(result)?;
    }
    for _ in 0..retries {
        store.increment_retry()?;
    }
    let Some(outcome) = success else {
        return Ok(StepDisposition::Failed);
    };
    store.update_context(&format!("{}_output", step.agent), Value::String(outcome.output))?;
    for (key, value) in outcome.context_updates {
        store.update_context(&key, value)?;
    }
    Ok(StepDisposition::Succeeded)
}

/// Split steps into execution groups: a run of adjacent parallel steps, or one
/// sequential step.
fn step_groups(steps: &[WorkflowStep]) -> Vec<&[WorkflowStep]> {
    let mut groups = Vec::new();
    let mut start = 0;
    while start < steps.len() {
        let mut end = start + 1;
        if steps[start].parallel {
            while end < steps.len() && steps[end].parallel {
                end += 1;
            }
        }
        groups.push(&steps[start..end]);
        start = end;
    }
    groups
}

/// Read-only inputs shared by every step in a group.
#[derive(Clone, Copy)]
struct StepCtx<'a> {
    agents: &'a AgentRegistry,
    workflow: &'a Workflow,
    task: &'a str,
    snapshot: &'a SessionContext,
    budget: &'a RetryBudget,
}

impl StepCtx<'_> {
    /// Run one step through its failure policy without touching the session.
    fn run(&self, step: &WorkflowStep) -> StepRun {
        let limit = step.retry_limit(self.workflow);
        let mut run = StepRun {
            results: Vec::new(),
            retries: 0,
            success: None,
            halt: false,
        };

        loop {
            let (result, outcome) = self.attempt(&step.agent, step);
            if outcome.success {
                run.results.push(result);
                run.success = Some(outcome);
                return run;
            }

            match step.on_failure {
                OnFailure::Retry => {
                    run.results.push(result);
                    if run.retries < limit && self.budget.try_take() {
                        run.retries += 1;
                        info!(agent = %step.agent, attempt = run.retries + 1, "retrying step");
                        continue;
                    }
                    let exhausted = KitError::RetryBudgetExhausted {
                        agent: step.agent.clone(),
                        retries: run.retries,
                    };
                    warn!(agent = %step.agent, retries = run.retries, "retries exhausted");
                    if let Some(last) = run.results.last_mut() {
                        last.output = format!("{}\n{exhausted}", last.output);
                    }
                    run.halt = step.required;
                }
                OnFailure::Skip => {
                    run.results.push(result);
                }
                OnFailure::Abort => {
                    run.results.push(result);
                    run.halt = true;
                }
                OnFailure::Fallback => {
                    let Some(fallback) = step.fallback_agent.as_deref() else {
                        run.results.push(result);
                        run.halt = step.required;
                        return run;
                    };
                    warn!(
                        agent = %step.agent,
                        fallback,
                        reason = %result.output,
                        "step failed, running fallback agent"
                    );
                    let (result, outcome) = self.attempt(fallback, step);
                    run.results.push(result);
                    if outcome.success {
                        run.success = Some(outcome);
                    } else {
                        run.halt = step.required;
                    }
                }
            }
            return run;
        }
    }

    /// Invoke `agent` once for `step` and turn the result into a record.
    ///
    /// Agent errors become failed outcomes whose output is the error chain,
    /// so captured stderr ends up in the session.
    fn attempt(&self, agent: &str, step: &WorkflowStep) -> (AgentResult, AgentOutcome) {
        let started = Instant::now();
        let outcome = match self.agents.get(agent) {
            Some(handle) => {
                let request = AgentRequest {
                    agent: agent.to_string(),
                    prompt: get_step_prompt(step, self.task, self.snapshot),
                    task: self.task.to_string(),
                    context: self.snapshot.clone(),
                };
                handle
                    .invoke(&request)
                    .unwrap_or_else(|err| AgentOutcome::failure(format!("{err:#}")))
            }
            None => AgentOutcome::failure(format!("agent '{agent}' is not registered")),
        };
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let status = if outcome.success {
            ResultStatus::Success
        } else {
            ResultStatus::Failure
        };
        debug!(agent, ?status, elapsed_ms, "agent attempt finished");
        let result =
            AgentResult::new(agent, status, outcome.output.clone()).with_duration_ms(elapsed_ms);
        (result, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedAgent, registry, step, temp_store, workflow};
    use serde_json::json;

    #[test]
    fn groups_adjacent_parallel_steps() {
        let steps = vec![
            step("a"),
            step("b").parallel(),
            step("c").parallel(),
            step("d"),
            step("e").parallel(),
        ];
        let sizes: Vec<usize> = step_groups(&steps).iter().map(|g| g.len()).collect();
        assert_eq!(sizes, vec![1, 2, 1, 1]);
    }

    #[test]
    fn success_output_lands_in_context() {
        let (_temp, store) = temp_store();
        let planner = ScriptedAgent::new([AgentOutcome::success("the plan")
            .with_update("files", json!(["a.rs"]))]);
        let agents = registry(&[("planner", &planner)]);
        let wf = workflow("wf", vec![step("planner")]);

        let outcome = run_workflow(&store, &agents, &wf, "task").expect("run");
        assert!(outcome.completed());
        assert_eq!(outcome.session.context["planner_output"], json!("the plan"));
        assert_eq!(outcome.session.context["files"], json!(["a.rs"]));
        assert_eq!(outcome.session.workflow_type.as_deref(), Some("wf"));
        planner.assert_drained();
    }

    #[test]
    fn retry_exhaustion_halts_required_step() {
        let (_temp, store) = temp_store();
        let coder = ScriptedAgent::new([
            AgentOutcome::failure("e1"),
            AgentOutcome::failure("e2"),
        ]);
        let tester = ScriptedAgent::new([]);
        let agents = registry(&[("coder", &coder), ("tester", &tester)]);
        let wf = workflow("wf", vec![step("coder").retry(1), step("tester")]);

        let outcome = run_workflow(&store, &agents, &wf, "task").expect("run");
        assert_eq!(outcome.session.status, SessionStatus::Failed);
        assert_eq!(outcome.session.agents.len(), 2);
        assert_eq!(outcome.session.retry_count, 1);
        assert!(outcome.session.agents[1].output.contains("retry budget exhausted"));
        assert_eq!(outcome.steps.len(), 1);
        coder.assert_drained();
        assert_eq!(tester.calls(), 0);
    }

    #[test]
    fn session_budget_caps_step_retries() {
        let (_temp, store) = temp_store();
        let coder = ScriptedAgent::new([
            AgentOutcome::failure("e1"),
            AgentOutcome::failure("e2"),
        ]);
        let agents = registry(&[("coder", &coder)]);
        let wf = workflow("wf", vec![step("coder").retry(5).optional()]).max_retries(1);

        let outcome = run_workflow(&store, &agents, &wf, "task").expect("run");
        assert!(outcome.completed(), "optional step failure does not halt");
        assert_eq!(outcome.session.retry_count, 1);
        assert_eq!(outcome.steps[0].disposition, StepDisposition::Failed);
    }

    #[test]
    fn skip_continues_even_when_required() {
        let (_temp, store) = temp_store();
        let scout = ScriptedAgent::new([AgentOutcome::failure("no index")]);
        let coder = ScriptedAgent::new([AgentOutcome::success("done")]);
        let agents = registry(&[("scout", &scout), ("coder", &coder)]);
        let wf = workflow(
            "wf",
            vec![step("scout").on_failure(OnFailure::Skip), step("coder")],
        );

        let outcome = run_workflow(&store, &agents, &wf, "task").expect("run");
        assert!(outcome.completed());
        let statuses: Vec<ResultStatus> =
            outcome.session.agents.iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec![ResultStatus::Failure, ResultStatus::Success]);
    }

    #[test]
    fn fallback_result_replaces_primary_failure() {
        let (_temp, store) = temp_store();
        let coder = ScriptedAgent::new([AgentOutcome::failure("too big")]);
        let lite = ScriptedAgent::new([AgentOutcome::success("small patch")]);
        let agents = registry(&[("coder", &coder), ("coder-lite", &lite)]);
        let wf = workflow("wf", vec![step("coder").fallback("coder-lite")]);

        let outcome = run_workflow(&store, &agents, &wf, "task").expect("run");
        assert!(outcome.completed());
        assert_eq!(outcome.session.agents.len(), 1);
        assert_eq!(outcome.session.agents[0].agent, "coder-lite");
        assert_eq!(outcome.session.context["coder_output"], json!("small patch"));
    }

    #[test]
    fn agent_errors_are_recorded_as_failures() {
        let (_temp, store) = temp_store();
        let coder = ScriptedAgent::new([]);
        coder.push_error("spawn gemini: No such file");
        let agents = registry(&[("coder", &coder)]);
        let wf = workflow("wf", vec![step("coder")]);

        let outcome = run_workflow(&store, &agents, &wf, "task").expect("run");
        assert_eq!(outcome.session.status, SessionStatus::Failed);
        assert!(outcome.session.agents[0].output.contains("No such file"));
    }

    #[test]
    fn unregistered_agents_fail_before_session_starts() {
        let (_temp, store) = temp_store();
        let wf = workflow("wf", vec![step("ghost")]);
        let err = run_workflow(&store, &AgentRegistry::new(), &wf, "task").expect_err("missing");
        assert!(err.to_string().contains("ghost"));
        assert!(store.current_session().is_none());
        assert!(store.list_sessions(None).expect("list").is_empty());
    }

    #[test]
    fn execute_requires_active_session() {
        let (_temp, store) = temp_store();
        let planner = ScriptedAgent::new([]);
        let agents = registry(&[("planner", &planner)]);
        let wf = workflow("wf", vec![step("planner")]);
        let err = execute_workflow(&store, &agents, &wf, "task").expect_err("no session");
        assert!(matches!(
            err.downcast_ref::<KitError>(),
            Some(KitError::SessionNotFound)
        ));
    }
}
