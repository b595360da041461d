//! Workflow definitions and the in-process workflow registry.
//!
//! Workflows are static: they are registered once at process start and never
//! persisted. Steps name agent identifiers that are resolved against an
//! [`AgentRegistry`](crate::agents::AgentRegistry) when a run begins.

use anyhow::{Result, anyhow};
use serde::Serialize;
use serde_json::Value;

use crate::core::selector::{WorkflowScore, best_match};
use crate::session::SessionContext;

/// What the engine does when a step's agent invocation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OnFailure {
    Retry,
    Skip,
    Abort,
    Fallback,
}

/// Predicate over the session context that gates a step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCondition {
    /// Key is present and its value is truthy.
    Truthy(String),
    /// Key is absent (or null).
    Missing(String),
    Equals { key: String, value: Value },
    Not(Box<StepCondition>),
}

impl StepCondition {
    pub fn evaluate(&self, context: &SessionContext) -> bool {
        match self {
            StepCondition::Truthy(key) => context.get(key).is_some_and(is_truthy),
            StepCondition::Missing(key) => context.get(key).is_none_or(Value::is_null),
            StepCondition::Equals { key, value } => context.get(key) == Some(value),
            StepCondition::Not(inner) => !inner.evaluate(context),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub agent: String,
    pub description: String,
    pub required: bool,
    pub on_failure: OnFailure,
    pub fallback_agent: Option<String>,
    /// Overrides the workflow retry budget for this step.
    pub max_retries: Option<u32>,
    pub parallel: bool,
    pub condition: Option<StepCondition>,
}

impl WorkflowStep {
    /// A required step that aborts the workflow on failure.
    pub fn new(agent: &str, description: &str) -> Self {
        Self {
            agent: agent.to_string(),
            description: description.to_string(),
            required: true,
            on_failure: OnFailure::Abort,
            fallback_agent: None,
            max_retries: None,
            parallel: false,
            condition: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn on_failure(mut self, policy: OnFailure) -> Self {
        self.on_failure = policy;
        self
    }

    pub fn retry(mut self, max_retries: u32) -> Self {
        self.on_failure = OnFailure::Retry;
        self.max_retries = Some(max_retries);
        self
    }

    pub fn fallback(mut self, agent: &str) -> Self {
        self.on_failure = OnFailure::Fallback;
        self.fallback_agent = Some(agent.to_string());
        self
    }

    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    pub fn when(mut self, condition: StepCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Retry budget for this step under `workflow`.
    ///
    /// The step override always applies. Without one, the workflow budget is
    /// used only when the workflow enables automatic retries.
    pub fn retry_limit(&self, workflow: &Workflow) -> u32 {
        match self.max_retries {
            Some(limit) => limit,
            None if workflow.auto_retry => workflow.max_retries,
            None => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub name: String,
    pub description: String,
    pub steps: Vec<WorkflowStep>,
    pub auto_retry: bool,
    pub max_retries: u32,
    /// Keywords scored against free-text tasks by auto-selection.
    #[serde(skip)]
    pub keywords: Vec<String>,
}

impl Workflow {
    pub fn new(name: &str, description: &str, steps: Vec<WorkflowStep>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            steps,
            auto_retry: true,
            max_retries: 3,
            keywords: Vec::new(),
        }
    }

    pub fn keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|k| k.to_ascii_lowercase()).collect();
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn auto_retry(mut self, enabled: bool) -> Self {
        self.auto_retry = enabled;
        self
    }

    /// Every agent id this workflow may invoke, including fallbacks.
    pub fn agent_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for step in &self.steps {
            for id in std::iter::once(step.agent.as_str()).chain(step.fallback_agent.as_deref()) {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("workflow name must not be empty"));
        }
        if self.steps.is_empty() {
            return Err(anyhow!("workflow '{}' has no steps", self.name));
        }
        for (idx, step) in self.steps.iter().enumerate() {
            if step.agent.trim().is_empty() {
                return Err(anyhow!(
                    "workflow '{}' step {idx} has an empty agent id",
                    self.name
                ));
            }
            if step.on_failure == OnFailure::Fallback && step.fallback_agent.is_none() {
                return Err(anyhow!(
                    "workflow '{}' step '{}' uses fallback without fallbackAgent",
                    self.name,
                    step.agent
                ));
            }
        }
        Ok(())
    }
}

/// Name and description pair returned by [`WorkflowRegistry::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowInfo {
    pub name: String,
    pub description: String,
}

/// Registration-ordered set of workflows with a designated default.
#[derive(Debug, Clone)]
pub struct WorkflowRegistry {
    workflows: Vec<Workflow>,
    default_name: String,
}

impl WorkflowRegistry {
    /// Empty registry; `default_name` must be registered before selection.
    pub fn new(default_name: &str) -> Self {
        Self {
            workflows: Vec::new(),
            default_name: default_name.to_string(),
        }
    }

    /// Registry preloaded with the built-in workflows (`feature` is the default).
    pub fn builtin() -> Self {
        let mut registry = Self::new("feature");
        for workflow in builtin_workflows() {
            if let Err(err) = registry.register(workflow) {
                tracing::error!(err = %err, "invalid built-in workflow");
            }
        }
        registry
    }

    pub fn register(&mut self, workflow: Workflow) -> Result<()> {
        workflow.validate()?;
        if self.get(&workflow.name).is_some() {
            return Err(anyhow!("workflow '{}' already registered", workflow.name));
        }
        self.workflows.push(workflow);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Workflow> {
        self.workflows.iter().find(|w| w.name == name)
    }

    pub fn list(&self) -> Vec<WorkflowInfo> {
        self.workflows
            .iter()
            .map(|w| WorkflowInfo {
                name: w.name.clone(),
                description: w.description.clone(),
            })
            .collect()
    }

    pub fn default_workflow(&self) -> Result<&Workflow> {
        self.get(&self.default_name)
            .ok_or_else(|| anyhow!("default workflow '{}' is not registered", self.default_name))
    }

    /// Pick the workflow whose keywords best match `task`.
    ///
    /// Falls back to the default workflow when no score clears the minimum
    /// confidence. Ties go to the first-registered workflow.
    pub fn auto_select(&self, task: &str) -> Result<&Workflow> {
        let scores: Vec<WorkflowScore> = self
            .workflows
            .iter()
            .map(|w| WorkflowScore::compute(&w.name, &w.keywords, task))
            .collect();
        match best_match(&scores) {
            Some(name) => self
                .get(name)
                .ok_or_else(|| anyhow!("selected workflow '{name}' vanished")),
            None => self.default_workflow(),
        }
    }
}

fn builtin_workflows() -> Vec<Workflow> {
    vec![
        Workflow::new(
            "feature",
            "Plan, implement, test and review a new feature",
            vec![
                WorkflowStep::new("planner", "Break the task into an implementation plan"),
                WorkflowStep::new("scout", "Locate the files and modules the plan touches")
                    .optional()
                    .on_failure(OnFailure::Skip),
                WorkflowStep::new("coder", "Implement the plan").retry(2),
                WorkflowStep::new("tester", "Write and run tests for the change").retry(2),
                WorkflowStep::new("reviewer", "Review the change for correctness and style")
                    .optional()
                    .on_failure(OnFailure::Skip),
                WorkflowStep::new("docs-manager", "Update user-facing documentation")
                    .optional()
                    .on_failure(OnFailure::Skip)
                    .when(StepCondition::Truthy("docs_required".to_string())),
            ],
        )
        .keywords(&["feature", "add", "implement", "build", "create", "new", "support"]),
        Workflow::new(
            "bugfix",
            "Reproduce, fix and verify a bug",
            vec![
                WorkflowStep::new("debugger", "Reproduce the bug and find its root cause"),
                WorkflowStep::new("coder", "Fix the root cause").retry(3),
                WorkflowStep::new("tester", "Add a regression test and run the suite").retry(2),
            ],
        )
        .keywords(&[
            "bug", "fix", "error", "crash", "broken", "issue", "fail", "regression",
        ]),
        Workflow::new(
            "refactor",
            "Restructure code without changing behaviour",
            vec![
                WorkflowStep::new("scout", "Map the code to be restructured"),
                WorkflowStep::new("planner", "Plan the refactor in safe increments"),
                WorkflowStep::new("coder", "Apply the refactor").fallback("coder-lite"),
                WorkflowStep::new("tester", "Confirm behaviour is unchanged").retry(1),
            ],
        )
        .keywords(&[
            "refactor", "cleanup", "clean up", "restructure", "simplify", "rename", "extract",
        ]),
        Workflow::new(
            "review",
            "Review existing changes for quality and security",
            vec![
                WorkflowStep::new("code-reviewer", "Review the diff for correctness")
                    .parallel()
                    .on_failure(OnFailure::Skip),
                WorkflowStep::new("security-auditor", "Audit the diff for security issues")
                    .parallel()
                    .on_failure(OnFailure::Skip),
                WorkflowStep::new("reviewer", "Merge review findings into one report"),
            ],
        )
        .keywords(&["review", "audit", "security", "pr", "pull request", "inspect"]),
        Workflow::new(
            "docs",
            "Write or update documentation",
            vec![
                WorkflowStep::new("scout", "Collect the code the docs describe")
                    .optional()
                    .on_failure(OnFailure::Skip),
                WorkflowStep::new("docs-manager", "Write the documentation").retry(1),
            ],
        )
        .keywords(&["docs", "document", "documentation", "readme", "guide", "changelog"]),
        Workflow::new(
            "release",
            "Verify and tag a release",
            vec![
                WorkflowStep::new("tester", "Run the full test suite"),
                WorkflowStep::new("git-manager", "Tag and publish the release"),
            ],
        )
        .keywords(&["release", "publish", "tag", "version", "ship"])
        .auto_retry(false),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_registry_lists_workflows_in_registration_order() {
        let registry = WorkflowRegistry::builtin();
        let names: Vec<String> = registry.list().into_iter().map(|w| w.name).collect();
        assert_eq!(
            names,
            vec!["feature", "bugfix", "refactor", "review", "docs", "release"]
        );
        assert_eq!(registry.default_workflow().expect("default").name, "feature");
    }

    #[test]
    fn auto_select_matches_keywords() {
        let registry = WorkflowRegistry::builtin();
        let pick = |task: &str| registry.auto_select(task).expect("select").name.clone();
        assert_eq!(pick("Fix the crash when saving settings"), "bugfix");
        assert_eq!(pick("Refactor the parser and simplify errors"), "refactor");
        assert_eq!(pick("Update the README guide"), "docs");
        assert_eq!(pick("security audit of the login pull request"), "review");
    }

    #[test]
    fn auto_select_falls_back_to_default() {
        let registry = WorkflowRegistry::builtin();
        let picked = registry.auto_select("hmm, something vague").expect("select");
        assert_eq!(picked.name, "feature");
    }

    #[test]
    fn auto_select_tie_goes_to_first_registered() {
        let mut registry = WorkflowRegistry::new("a");
        let step = || vec![WorkflowStep::new("x", "x")];
        registry
            .register(Workflow::new("a", "A", step()).keywords(&["alpha"]))
            .expect("a");
        registry
            .register(Workflow::new("b", "B", step()).keywords(&["beta"]))
            .expect("b");
        registry
            .register(Workflow::new("c", "C", step()).keywords(&["beta"]))
            .expect("c");
        assert_eq!(registry.auto_select("beta").expect("select").name, "b");
    }

    #[test]
    fn register_rejects_fallback_without_agent_and_duplicates() {
        let mut registry = WorkflowRegistry::new("x");
        let mut step = WorkflowStep::new("coder", "code");
        step.on_failure = OnFailure::Fallback;
        let err = registry
            .register(Workflow::new("x", "X", vec![step]))
            .expect_err("missing fallback");
        assert!(err.to_string().contains("fallbackAgent"));

        registry
            .register(Workflow::new("x", "X", vec![WorkflowStep::new("a", "a")]))
            .expect("first");
        let err = registry
            .register(Workflow::new("x", "X", vec![WorkflowStep::new("a", "a")]))
            .expect_err("duplicate");
        assert!(err.to_string().contains("already registered"));

        let err = registry
            .register(Workflow::new("empty", "E", Vec::new()))
            .expect_err("empty");
        assert!(err.to_string().contains("no steps"));
    }

    #[test]
    fn conditions_evaluate_against_context() {
        let mut ctx = SessionContext::new();
        ctx.insert("flag".to_string(), json!(true));
        ctx.insert("zero".to_string(), json!(0));
        ctx.insert("lang".to_string(), json!("rust"));
        ctx.insert("nothing".to_string(), Value::Null);

        assert!(StepCondition::Truthy("flag".into()).evaluate(&ctx));
        assert!(!StepCondition::Truthy("zero".into()).evaluate(&ctx));
        assert!(!StepCondition::Truthy("absent".into()).evaluate(&ctx));
        assert!(StepCondition::Missing("absent".into()).evaluate(&ctx));
        assert!(StepCondition::Missing("nothing".into()).evaluate(&ctx));
        assert!(!StepCondition::Missing("lang".into()).evaluate(&ctx));
        assert!(
            StepCondition::Equals {
                key: "lang".into(),
                value: json!("rust")
            }
            .evaluate(&ctx)
        );
        assert!(!StepCondition::Not(Box::new(StepCondition::Truthy("flag".into()))).evaluate(&ctx));
    }

    #[test]
    fn retry_limit_prefers_step_override_and_honours_auto_retry() {
        let step = WorkflowStep::new("coder", "code").on_failure(OnFailure::Retry);
        let wf = Workflow::new("w", "W", vec![step.clone()]).max_retries(4);
        assert_eq!(step.retry_limit(&wf), 4);

        let manual = wf.clone().auto_retry(false);
        assert_eq!(step.retry_limit(&manual), 0);
        assert_eq!(step.clone().retry(2).retry_limit(&manual), 2);
    }

    #[test]
    fn agent_ids_include_fallbacks_once() {
        let wf = Workflow::new(
            "w",
            "W",
            vec![
                WorkflowStep::new("coder", "c").fallback("coder-lite"),
                WorkflowStep::new("coder", "again"),
            ],
        );
        assert_eq!(wf.agent_ids(), vec!["coder", "coder-lite"]);
    }
}
