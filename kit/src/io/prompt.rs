//! Step prompt rendering.

use std::sync::LazyLock;

use minijinja::{Environment, context};
use serde::Serialize;
use serde_json::Value;

use crate::session::SessionContext;
use crate::workflow::WorkflowStep;

const STEP_TEMPLATE: &str = include_str!("prompts/step.md");

/// Context values longer than this (in chars) are cut and marked.
pub const MAX_CONTEXT_VALUE_CHARS: usize = 2000;

static ENV: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.add_template("step", STEP_TEMPLATE)
        .expect("step template should be valid");
    env
});

#[derive(Debug, Serialize)]
struct ContextEntry<'a> {
    key: &'a str,
    value: String,
}

/// Render the instruction handed to the agent running `step`.
///
/// Combines the agent id, the overall task, the step description, and every
/// context entry in key order. String values are inlined as-is; other values
/// are rendered as compact JSON.
pub fn get_step_prompt(step: &WorkflowStep, task: &str, context: &SessionContext) -> String {
    let entries: Vec<ContextEntry<'_>> = context
        .iter()
        .map(|(key, value)| ContextEntry {
            key,
            value: truncate_chars(&render_value(value), MAX_CONTEXT_VALUE_CHARS),
        })
        .collect();

    let template = ENV
        .get_template("step")
        .expect("step template should be registered");
    let rendered = template
        .render(context! {
            agent => step.agent.as_str(),
            task => task.trim(),
            description => step.description.trim(),
            context => entries,
        })
        .expect("step template rendering should not fail");
    let mut out = rendered.trim_end().to_string();
    out.push('\n');
    out
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

fn truncate_chars(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((idx, _)) => format!("{}\n[truncated]", &value[..idx]),
        None => value.to_string(),
    }
}
