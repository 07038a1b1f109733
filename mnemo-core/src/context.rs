//! LLM Context Builder — packs retrieved memories for a dialogue prompt.
//!
//! Besides the memories themselves the context carries a one-line summary
//! (type counts and dominant emotions) and a relationship score derived from
//! emotion tags, so the dialogue model can set its tone without reading
//! every memory.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::pipeline::{HybridSearcher, SearchRequest};
use crate::retrieval::RetrievalResult;

/// Summary used when nothing was retrieved.
pub const NO_INTERACTIONS: &str = "No previous interactions";

/// Emotion tags that count toward a positive relationship.
pub const POSITIVE_EMOTIONS: &[&str] = &["grateful", "trust", "friendly", "joy", "admiration"];

/// Emotion tags that count toward a negative relationship.
pub const NEGATIVE_EMOTIONS: &[&str] = &["angry", "disappointed", "suspicious", "fear", "disgust"];

const MAX_SUMMARY_EMOTIONS: usize = 3;

/// Memories plus derived signals for one dialogue turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryContext {
    /// Retrieved memories, best first.
    pub memories: Vec<RetrievalResult>,
    /// Short human-readable digest.
    pub summary: String,
    /// Number of memories included.
    pub total_interactions: usize,
    /// Most recent creation time among the memories.
    pub last_interaction: Option<DateTime<Utc>>,
    /// Sentiment in `[-1, 1]`; 0 when no known emotion is tagged.
    pub relationship_score: f64,
}

/// Build a context from ranked results.
#[must_use]
pub fn build_context(memories: Vec<RetrievalResult>) -> MemoryContext {
    let summary = if memories.is_empty() {
        NO_INTERACTIONS.to_string()
    } else {
        summarize(&memories)
    };
    MemoryContext {
        summary,
        total_interactions: memories.len(),
        last_interaction: memories.iter().filter_map(|m| m.payload.created_at).max(),
        relationship_score: relationship_score(&memories),
        memories,
    }
}

/// Search and build the context in one step.
///
/// # Errors
/// Propagates [`HybridSearcher::search`] errors.
pub async fn prepare_context(searcher: &HybridSearcher, request: &SearchRequest) -> Result<MemoryContext> {
    let response = searcher.search(request).await?;
    Ok(build_context(response.results))
}

/// "2 trade, 1 quest; emotions: grateful, trust" (types in first-seen order).
fn summarize(memories: &[RetrievalResult]) -> String {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    let mut emotions: Vec<&str> = Vec::new();

    for m in memories {
        let tag = m.payload.memory_type.map_or("untyped", |t| t.as_str());
        match counts.iter_mut().find(|(t, _)| *t == tag) {
            Some((_, n)) => *n += 1,
            None => counts.push((tag, 1)),
        }
        for e in &m.payload.emotion_tags {
            if emotions.len() < MAX_SUMMARY_EMOTIONS && !emotions.contains(&e.as_str()) {
                emotions.push(e);
            }
        }
    }

    let mut summary = counts
        .iter()
        .map(|(t, n)| format!("{n} {t}"))
        .collect::<Vec<_>>()
        .join(", ");
    if !emotions.is_empty() {
        summary.push_str("; emotions: ");
        summary.push_str(&emotions.join(", "));
    }
    summary
}

/// `(positive − negative) / (positive + negative)` over all emotion tags.
#[must_use]
pub fn relationship_score(memories: &[RetrievalResult]) -> f64 {
    let (mut positive, mut negative) = (0_u32, 0_u32);
    for tag in memories.iter().flat_map(|m| &m.payload.emotion_tags) {
        let tag = tag.trim().to_ascii_lowercase();
        if POSITIVE_EMOTIONS.contains(&tag.as_str()) {
            positive += 1;
        } else if NEGATIVE_EMOTIONS.contains(&tag.as_str()) {
            negative += 1;
        }
    }
    let total = positive + negative;
    if total == 0 {
        return 0.0;
    }
    (f64::from(positive) - f64::from(negative)) / f64::from(total)
}

/// Render the context as prompt text: summary line, then one bullet per memory.
#[must_use]
pub fn format_for_prompt(context: &MemoryContext) -> String {
    let mut out = format!(
        "Relationship: {:+.2} | {}\n",
        context.relationship_score, context.summary
    );
    for m in &context.memories {
        let tag = m.payload.memory_type.map_or("untyped", |t| t.as_str());
        match m.payload.created_at {
            Some(at) => out.push_str(&format!("- [{tag}, {}] {}\n", at.format("%Y-%m-%d"), m.payload.content)),
            None => out.push_str(&format!("- [{tag}] {}\n", m.payload.content)),
        }
    }
    out
}
