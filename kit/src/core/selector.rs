//! Keyword scoring used to map a free-text task onto a workflow.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

/// Scores below this are treated as "no match" and the default workflow wins.
pub const MIN_CONFIDENCE: u32 = 1;

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-z0-9]+").expect("word regex should be valid"));

/// Keyword score for one workflow against one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowScore<'a> {
    pub name: &'a str,
    pub score: u32,
}

impl<'a> WorkflowScore<'a> {
    /// Count the keywords that appear in `task`.
    ///
    /// Single-word keywords must match a whole word; multi-word keywords
    /// match as a phrase of consecutive words.
    pub fn compute(name: &'a str, keywords: &[String], task: &str) -> Self {
        let words = tokenize(task);
        let joined = format!(" {} ", words.join(" "));
        let word_set: HashSet<&str> = words.iter().map(String::as_str).collect();

        let score = keywords
            .iter()
            .filter(|keyword| {
                let parts = tokenize(keyword);
                match parts.as_slice() {
                    [] => false,
                    [single] => word_set.contains(single.as_str()),
                    _ => joined.contains(&format!(" {} ", parts.join(" "))),
                }
            })
            .count() as u32;

        Self { name, score }
    }
}

fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_ascii_lowercase();
    WORD_RE
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Name of the highest-scoring workflow, if any clears [`MIN_CONFIDENCE`].
///
/// `scores` is in registration order; on ties the earliest entry wins.
pub fn best_match<'a>(scores: &[WorkflowScore<'a>]) -> Option<&'a str> {
    let mut best: Option<&WorkflowScore<'a>> = None;
    for candidate in scores {
        if candidate.score < MIN_CONFIDENCE {
            continue;
        }
        if best.is_none_or(|b| candidate.score > b.score) {
            best = Some(candidate);
        }
    }
    best.map(|b| b.name)
}
