//! Judge Prompt Evaluation — Golden Test Set.
//!
//! A curated set of judge requests with the strings their rendered prompts
//! must (and must not) contain, plus canned model replies that must parse
//! into a usable ranking.
//!
//! ## Usage
//!
//! - **Offline eval:** `cargo test -p mnemo-llm --test eval_golden` checks
//!   that rendering produces well-formed prompts.
//! - **Online eval (requires Ollama):** set `MNEMO_EVAL_LLM=1` to send the
//!   golden requests to the configured model and check the replies parse.

use mnemo_core::judge::{JUDGE_INSTRUCTION, JudgeCandidate, JudgeRequest, parse_ranking};
use mnemo_core::types::{MemoryId, MemoryType};
use mnemo_llm::prompt;

/// A golden test case for prompt evaluation.
struct GoldenCase {
    /// Human-readable name for the test case.
    name: &'static str,
    /// The query.
    query: &'static str,
    /// `(id, type, content)` in fused order.
    candidates: Vec<(&'static str, Option<MemoryType>, &'static str)>,
    /// Strings that MUST appear in the rendered user prompt.
    prompt_must_contain: Vec<&'static str>,
    /// Strings that MUST NOT appear in the rendered prompts.
    prompt_must_not_contain: Vec<&'static str>,
}

impl GoldenCase {
    fn request(&self) -> JudgeRequest {
        JudgeRequest {
            query: self.query.to_string(),
            candidates: self
                .candidates
                .iter()
                .map(|(id, memory_type, content)| JudgeCandidate {
                    id: MemoryId::new(*id),
                    content: (*content).to_string(),
                    memory_type: *memory_type,
                })
                .collect(),
            instruction: JUDGE_INSTRUCTION,
        }
    }
}

const UNRESOLVED: [&str; 4] = ["{query}", "{instruction}", "{candidates_formatted}", "{candidate_count}"];

fn golden_cases() -> Vec<GoldenCase> {
    vec![
        // ---------------------------------------------------------------
        // 1. Blacksmith asked about a past trade
        // ---------------------------------------------------------------
        GoldenCase {
            name: "blacksmith_trade_recall",
            query: "Do you remember the sword you sold me?",
            candidates: vec![
                ("m-101", Some(MemoryType::Trade), "Sold a steel longsword to the player for 40 gold"),
                ("m-102", Some(MemoryType::Dialogue), "Player complained about the weather"),
                ("m-103", Some(MemoryType::Quest), "Player brought back iron ore from the northern mine"),
            ],
            prompt_must_contain: vec![
                "Do you remember the sword you sold me?",
                "id=m-101 [trade]",
                "id=m-103 [quest]",
                "Candidates (3)",
            ],
            prompt_must_not_contain: vec!["TODO"],
        },
        // ---------------------------------------------------------------
        // 2. Hostile guard, combat memories
        // ---------------------------------------------------------------
        GoldenCase {
            name: "guard_combat_grudge",
            query: "Why won't you let me through the gate?",
            candidates: vec![
                ("g-7", Some(MemoryType::Combat), "Player attacked a caravan guard outside the walls"),
                ("g-9", Some(MemoryType::Emotion), "Felt suspicious when the player lingered at night"),
            ],
            prompt_must_contain: vec!["gate", "id=g-7 [combat]", "id=g-9 [emotion]"],
            prompt_must_not_contain: vec![],
        },
        // ---------------------------------------------------------------
        // 3. Untyped legacy memory with multi-line content
        // ---------------------------------------------------------------
        GoldenCase {
            name: "legacy_untyped_multiline",
            query: "What happened at the harvest festival?",
            candidates: vec![(
                "legacy-1",
                None,
                "The festival ended early.\nA storm rolled in\n\nfrom the coast.",
            )],
            prompt_must_contain: vec![
                "id=legacy-1 [untyped] The festival ended early. A storm rolled in from the coast.",
            ],
            prompt_must_not_contain: vec!["early.\nA storm"],
        },
        // ---------------------------------------------------------------
        // 4. Gift memories, the player fishing for goodwill
        // ---------------------------------------------------------------
        GoldenCase {
            name: "herbalist_gift_goodwill",
            query: "Have I ever given you anything?",
            candidates: vec![
                ("h-1", Some(MemoryType::Gift), "Player gave a bundle of moonpetals"),
                ("h-2", Some(MemoryType::Gift), "Player gave a cracked mirror"),
                ("h-3", Some(MemoryType::Trade), "Bought healing salve from the player"),
                ("h-4", Some(MemoryType::Dialogue), "Talked about the old mill"),
            ],
            prompt_must_contain: vec!["moonpetals", "Candidates (4)", "id=h-4 [dialogue]"],
            prompt_must_not_contain: vec![],
        },
        // ---------------------------------------------------------------
        // 5. Empty head (no candidates survived fusion)
        // ---------------------------------------------------------------
        GoldenCase {
            name: "empty_candidate_set",
            query: "Who are you?",
            candidates: vec![],
            prompt_must_contain: vec!["Who are you?", "Candidates (0)"],
            prompt_must_not_contain: vec!["id="],
        },
    ]
}

// ---------------------------------------------------------------------------
// Offline Tests: Template Rendering Validation
// ---------------------------------------------------------------------------

#[test]
fn golden_prompts_render_without_unresolved_vars() {
    for case in golden_cases() {
        let (system, user) = prompt::render_judge_prompt(&case.request());

        for needle in &case.prompt_must_contain {
            assert!(
                user.contains(needle),
                "Golden case '{}': rendered prompt must contain '{}' but doesn't.\nRendered:\n{}",
                case.name,
                needle,
                &user[..user.len().min(500)]
            );
        }

        for needle in case.prompt_must_not_contain.iter().chain(UNRESOLVED.iter()) {
            assert!(
                !system.contains(needle) && !user.contains(needle),
                "Golden case '{}': rendered prompt must NOT contain '{}' but does.",
                case.name,
                needle
            );
        }
    }
}

#[test]
fn every_candidate_listed_once_in_order() {
    for case in golden_cases() {
        let (_, user) = prompt::render_judge_prompt(&case.request());
        let listed: Vec<&str> = user
            .lines()
            .filter_map(|line| line.strip_prefix("- id="))
            .filter_map(|rest| rest.split_whitespace().next())
            .collect();
        let expected: Vec<&str> = case.candidates.iter().map(|(id, _, _)| *id).collect();
        assert_eq!(listed, expected, "Golden case '{}'", case.name);
    }
}

#[test]
fn system_prompt_carries_output_contract() {
    let (system, _) = prompt::render_judge_prompt(&golden_cases()[0].request());
    assert!(system.contains(JUDGE_INSTRUCTION));
    assert!(system.contains("identifiers"));
    assert!(prompt::RELEVANCE_JUDGE_USER.contains("JSON"));
}

// ---------------------------------------------------------------------------
// Offline Tests: Canned Replies
// ---------------------------------------------------------------------------

#[test]
fn typical_model_replies_parse() {
    let replies = [
        (r#"{"ranking": ["m-103", "m-101"]}"#, vec!["m-103", "m-101"]),
        ("```json\n{\"ranking\": [\"m-101\"]}\n```", vec!["m-101"]),
        (r#"["m-102", "m-101", "m-103"]"#, vec!["m-102", "m-101", "m-103"]),
    ];
    for (text, expected) in replies {
        let parsed = parse_ranking(text).expect("reply should parse");
        assert_eq!(parsed, expected, "reply: {text}");
    }
}

#[test]
fn chatty_replies_are_rejected() {
    assert!(parse_ranking("Sure! The most relevant memory is m-101.").is_err());
    assert!(parse_ranking("").is_err());
}

#[test]
fn golden_set_has_minimum_coverage() {
    let cases = golden_cases();
    assert!(cases.len() >= 5, "Golden set must have at least 5 cases, got {}", cases.len());
    let types: std::collections::HashSet<_> = cases
        .iter()
        .flat_map(|c| c.candidates.iter().filter_map(|(_, t, _)| *t))
        .collect();
    assert!(types.len() >= 5, "golden candidates should span most memory types");
}

// ---------------------------------------------------------------------------
// Online Eval: opt-in, requires a running Ollama
// ---------------------------------------------------------------------------

#[tokio::test]
async fn online_judge_replies_parse() {
    use mnemo_core::judge::RelevanceJudge;

    if std::env::var("MNEMO_EVAL_LLM").as_deref() != Ok("1") {
        return;
    }
    let config = mnemo_core::config::LlmConfig {
        provider: "ollama".into(),
        ..Default::default()
    };
    let judge = mnemo_llm::LlmJudge::from_config(&config).expect("ollama config");
    for case in golden_cases().into_iter().filter(|c| !c.candidates.is_empty()) {
        let text = judge.judge(&case.request()).await.expect("judge reply");
        let order = parse_ranking(&text).unwrap_or_else(|e| panic!("case '{}': {e}", case.name));
        assert!(!order.is_empty(), "case '{}' returned an empty ranking", case.name);
    }
}
