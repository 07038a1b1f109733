//! Prompt templates for the relevance judge.
//!
//! Every prompt is a versioned, testable artifact (see `tests/eval_golden.rs`).

use mnemo_core::judge::{JudgeCandidate, JudgeRequest};

/// Template version, logged with every judge call.
pub const PROMPT_VERSION: &str = "judge-v1";

/// System prompt: role plus the output contract carried by the request.
pub const RELEVANCE_JUDGE_SYSTEM: &str = r"You judge which memories of a game character matter for the current conversation.
You never role-play and never explain yourself.
{instruction}";

/// User prompt: the query and one line per candidate.
pub const RELEVANCE_JUDGE_USER: &str = r#"Query: {query}

Candidates ({candidate_count}):
{candidates_formatted}

Return JSON:
{"ranking": ["<id>", ...]}"#;

/// Simple template interpolation for prompts.
///
/// Replaces `{key}` with the corresponding value; unknown keys are left as is.
#[must_use]
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        result = result.replace(&format!("{{{key}}}"), value);
    }
    result
}

/// `- id=<id> [<type>] <content>`, one line per candidate, newlines flattened.
#[must_use]
pub fn format_candidates(candidates: &[JudgeCandidate]) -> String {
    candidates
        .iter()
        .map(|c| {
            let tag = c.memory_type.map_or("untyped", |t| t.as_str());
            let content = c.content.split_whitespace().collect::<Vec<_>>().join(" ");
            format!("- id={} [{tag}] {content}", c.id)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render `(system, user)` prompts for a judge request.
#[must_use]
pub fn render_judge_prompt(request: &JudgeRequest) -> (String, String) {
    let system = render_template(RELEVANCE_JUDGE_SYSTEM, &[("instruction", request.instruction)]);
    let count = request.candidates.len().to_string();
    let formatted = format_candidates(&request.candidates);
    let user = render_template(
        RELEVANCE_JUDGE_USER,
        &[
            ("query", request.query.as_str()),
            ("candidate_count", count.as_str()),
            ("candidates_formatted", formatted.as_str()),
        ],
    );
    (system, user)
}
