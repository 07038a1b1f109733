//! External Relevance Judge — optional, fail-open reordering of the head.
//!
//! The judge (usually an LLM, see `mnemo-llm`) receives one batched request
//! with the query and the head of the reranked list and must answer with the
//! identifiers in its preferred order. The response is treated as untrusted:
//! invented identifiers are discarded, duplicates collapse to their first
//! occurrence, and anything the judge left out is appended in the original
//! order. Any failure falls back to the reranker's own order.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::retrieval::RetrievalResult;
use crate::types::{MemoryId, MemoryType};

/// Instruction sent with every judge request.
pub const JUDGE_INSTRUCTION: &str = "Rank the candidate memories by relevance to the query. \
Return only a JSON object of the form {\"ranking\": [\"<id>\", ...]} using identifiers \
from the given candidate set. Do not invent identifiers and do not add commentary.";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// External reranker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RerankerConfig {
    /// Whether the judge is consulted at all.
    #[serde(default)]
    pub enabled: bool,
    /// Upper bound on candidates sent to the judge (raised to `top_k` if smaller).
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    /// Deadline for one judge call.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_candidates: default_max_candidates(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl RerankerConfig {
    /// Number of leading candidates submitted for a given `top_k`.
    #[must_use]
    pub fn head_size(&self, top_k: usize) -> usize {
        self.max_candidates.max(top_k)
    }
}

fn default_max_candidates() -> usize {
    20
}
fn default_timeout_ms() -> u64 {
    5_000
}

// ---------------------------------------------------------------------------
// Judge contract
// ---------------------------------------------------------------------------

/// One candidate as shown to the judge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JudgeCandidate {
    /// Identifier the judge must echo back.
    pub id: MemoryId,
    /// Memory text.
    pub content: String,
    /// Category tag, if known.
    pub memory_type: Option<MemoryType>,
}

/// A batched relevance-ranking request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JudgeRequest {
    /// The user query.
    pub query: String,
    /// Candidates in current rank order.
    pub candidates: Vec<JudgeCandidate>,
    /// Output contract for the judge.
    pub instruction: &'static str,
}

impl JudgeRequest {
    /// Build a request from the head of a ranked list.
    #[must_use]
    pub fn new(query: &str, head: &[RetrievalResult]) -> Self {
        Self {
            query: query.to_string(),
            candidates: head
                .iter()
                .map(|r| JudgeCandidate {
                    id: r.id.clone(),
                    content: r.payload.content.clone(),
                    memory_type: r.payload.memory_type,
                })
                .collect(),
            instruction: JUDGE_INSTRUCTION,
        }
    }
}

/// Why a judge call did not produce a response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JudgeError {
    /// The judge is not configured or refused the request.
    #[error("judge unavailable: {0}")]
    Unavailable(String),
    /// The judge did not answer in time.
    #[error("judge timed out")]
    Timeout,
    /// Transport-level failure talking to the judge.
    #[error("judge transport error: {0}")]
    Transport(String),
    /// The caller abandoned the request.
    #[error("judge request cancelled")]
    Cancelled,
}

/// An external relevance judge.
#[async_trait]
pub trait RelevanceJudge: Send + Sync {
    /// Return the judge's raw response text for `request`.
    ///
    /// # Errors
    /// Any [`JudgeError`]; the adapter fails open on all of them.
    async fn judge(&self, request: &JudgeRequest) -> Result<String, JudgeError>;
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// What happened to the judge stage for one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum JudgeOutcome {
    /// Disabled, unconfigured, or nothing to rank.
    Skipped,
    /// The judge's ordering was applied.
    Applied,
    /// The judge failed; the original order was returned.
    FailedOpen(FailOpenReason),
}

/// Cause of a fail-open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailOpenReason {
    /// Deadline exceeded.
    Timeout,
    /// Caller cancellation.
    Cancelled,
    /// The judge returned an error.
    Judge(String),
    /// The response was not a usable ranking.
    Parse(String),
}

impl fmt::Display for FailOpenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Judge(e) => write!(f, "judge error: {e}"),
            Self::Parse(e) => write!(f, "unparseable response: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Optionally reorder `ranked` with the judge and return the first `top_k`.
///
/// Never fails: every error path returns `ranked[..top_k]`.
pub async fn maybe_rerank(
    query: &str,
    ranked: Vec<RetrievalResult>,
    top_k: usize,
    judge: Option<&dyn RelevanceJudge>,
    config: &RerankerConfig,
) -> (Vec<RetrievalResult>, JudgeOutcome) {
    maybe_rerank_with_cancel(query, ranked, top_k, judge, config, std::future::pending()).await
}

/// Like [`maybe_rerank`], but fails open as soon as `cancel` resolves.
pub async fn maybe_rerank_with_cancel<C>(
    query: &str,
    mut ranked: Vec<RetrievalResult>,
    top_k: usize,
    judge: Option<&dyn RelevanceJudge>,
    config: &RerankerConfig,
    cancel: C,
) -> (Vec<RetrievalResult>, JudgeOutcome)
where
    C: Future<Output = ()> + Send,
{
    let judge = match judge {
        Some(judge) if config.enabled && top_k > 0 && !ranked.is_empty() => judge,
        _ => {
            ranked.truncate(top_k);
            return (ranked, JudgeOutcome::Skipped);
        }
    };

    let head_len = config.head_size(top_k).min(ranked.len());
    let request = JudgeRequest::new(query, &ranked[..head_len]);
    let deadline = Duration::from_millis(config.timeout_ms);

    let response = tokio::select! {
        biased;
        () = cancel => Err(FailOpenReason::Cancelled),
        result = tokio::time::timeout(deadline, judge.judge(&request)) => match result {
            Err(_) => Err(FailOpenReason::Timeout),
            Ok(Err(JudgeError::Timeout)) => Err(FailOpenReason::Timeout),
            Ok(Err(JudgeError::Cancelled)) => Err(FailOpenReason::Cancelled),
            Ok(Err(e)) => Err(FailOpenReason::Judge(e.to_string())),
            Ok(Ok(text)) => parse_ranking(&text).map_err(FailOpenReason::Parse),
        },
    };

    match response {
        Ok(order) => {
            let mut reordered = apply_ranking(ranked, head_len, &order);
            reordered.truncate(top_k);
            debug!(candidates = head_len, returned = order.len(), "Judge ranking applied");
            (reordered, JudgeOutcome::Applied)
        }
        Err(reason) => {
            warn!(%reason, candidates = head_len, "Relevance judge failed open");
            ranked.truncate(top_k);
            (ranked, JudgeOutcome::FailedOpen(reason))
        }
    }
}

/// Extract the identifier list from a judge response.
///
/// Accepts `{"ranking": [...]}` or a bare JSON array, optionally wrapped in
/// a markdown code fence. Non-string entries are skipped.
///
/// # Errors
/// Returns a description when the text is not JSON of either shape.
pub fn parse_ranking(text: &str) -> Result<Vec<String>, String> {
    let body = strip_code_fence(text);
    let value: serde_json::Value = serde_json::from_str(body).map_err(|e| e.to_string())?;
    let items = match &value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(map) => map
            .get("ranking")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| "missing \"ranking\" array".to_string())?,
        _ => return Err("expected a JSON array or object".to_string()),
    };
    Ok(items
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect())
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_end();
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    // Drop the info string ("json"), which may share the line with the body.
    rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()).trim()
}

/// Reorder the first `head_len` entries of `ranked` by `order`.
///
/// Unknown identifiers are ignored, repeats keep their first position,
/// omitted head entries follow in their original order, and entries beyond
/// the head are left untouched at the end.
#[must_use]
pub fn apply_ranking(
    ranked: Vec<RetrievalResult>,
    head_len: usize,
    order: &[String],
) -> Vec<RetrievalResult> {
    let head_len = head_len.min(ranked.len());
    let mut slots: Vec<Option<RetrievalResult>> = ranked.into_iter().map(Some).collect();
    let mut out = Vec::with_capacity(slots.len());
    let mut placed: HashSet<&str> = HashSet::with_capacity(order.len());

    for id in order {
        if !placed.insert(id.as_str()) {
            continue;
        }
        if let Some(slot) = slots[..head_len]
            .iter_mut()
            .find(|s| s.as_ref().is_some_and(|r| r.id.as_str() == id))
        {
            out.extend(slot.take());
        }
    }
    out.extend(slots.into_iter().flatten());
    out
}
