//! Fitness builders — turn labeled queries into a GA fitness callback.
//!
//! ```text
//!   k            = min(|results|, |expected|)
//!   precision@k  = |set(results[..k]) ∩ expected| / k
//!   fitness      = mean precision@k over all labeled queries
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::params::SearchParameters;
use crate::types::MemoryId;

/// A query with its ground-truth relevant memories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledQuery {
    /// Player the query is issued for.
    pub player_id: String,
    /// NPC whose memories are searched.
    pub npc_id: String,
    /// Query text.
    pub query: String,
    /// Identifiers of the memories a good search returns.
    pub expected: Vec<String>,
}

impl LabeledQuery {
    /// Create a labeled query.
    #[must_use]
    pub fn new<I, S>(player_id: &str, npc_id: &str, query: &str, expected: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            player_id: player_id.to_string(),
            npc_id: npc_id.to_string(),
            query: query.to_string(),
            expected: expected.into_iter().map(Into::into).collect(),
        }
    }
}

fn hits<R: AsRef<str>>(results: &[R], expected: &[String], k: usize) -> usize {
    let expected: HashSet<&str> = expected.iter().map(String::as_str).collect();
    results[..k]
        .iter()
        .map(|r| AsRef::<str>::as_ref(r))
        .filter(|id| expected.contains(id))
        .collect::<HashSet<&str>>()
        .len()
}

/// Precision at `k = min(|results|, |expected|)`; 0 when either side is empty.
#[must_use]
pub fn precision_at_k<R: AsRef<str>>(results: &[R], expected: &[String]) -> f64 {
    let k = results.len().min(expected.len());
    if k == 0 {
        return 0.0;
    }
    hits(results, expected, k) as f64 / k as f64
}

/// Share of `expected` found in the first `min(k_cap, |results|)` results.
#[must_use]
pub fn recall_at_k<R: AsRef<str>>(results: &[R], expected: &[String], k_cap: usize) -> f64 {
    let distinct: HashSet<&str> = expected.iter().map(String::as_str).collect();
    if distinct.is_empty() {
        return 0.0;
    }
    let k = results.len().min(k_cap);
    hits(results, expected, k) as f64 / distinct.len() as f64
}

/// Build a GA fitness callback: mean precision@k of `search` over `queries`.
///
/// An empty query set scores 0. The first search error is returned as is,
/// which aborts the optimization run.
pub fn precision_fitness<S, E>(
    queries: Vec<LabeledQuery>,
    search: S,
) -> impl Fn(&SearchParameters) -> Result<f64, E> + Sync
where
    S: Fn(&LabeledQuery, &SearchParameters) -> Result<Vec<MemoryId>, E> + Sync,
{
    move |params: &SearchParameters| {
        if queries.is_empty() {
            return Ok(0.0);
        }
        let mut total = 0.0;
        for query in &queries {
            let results = search(query, params)?;
            total += precision_at_k(&results, &query.expected);
        }
        Ok(total / queries.len() as f64)
    }
}

/// Per-query quality of one parameter set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryScore {
    /// Query text.
    pub query: String,
    /// precision@k.
    pub precision: f64,
    /// recall@k.
    pub recall: f64,
    /// Distinct relevant memories found in the top k.
    pub found: usize,
    /// Number of expected memories.
    pub expected: usize,
}

/// Quality report for one parameter set over a labeled query set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    /// Per-query breakdown, in input order.
    pub queries: Vec<QueryScore>,
    /// Mean precision@k (the GA fitness).
    pub mean_precision: f64,
    /// Mean recall@k.
    pub mean_recall: f64,
    /// Harmonic mean of the two means.
    pub f1: f64,
}

/// Evaluate `params` in detail, e.g. to compare a tuned set to the baseline.
///
/// # Errors
/// The first search error.
pub fn evaluate_parameters<S, E>(
    params: &SearchParameters,
    queries: &[LabeledQuery],
    search: S,
) -> Result<EvaluationReport, E>
where
    S: Fn(&LabeledQuery, &SearchParameters) -> Result<Vec<MemoryId>, E>,
{
    let mut scores = Vec::with_capacity(queries.len());
    for query in queries {
        let results = search(query, params)?;
        let k = results.len().min(query.expected.len());
        scores.push(QueryScore {
            query: query.query.clone(),
            precision: precision_at_k(&results, &query.expected),
            recall: recall_at_k(&results, &query.expected, k),
            found: hits(&results, &query.expected, k),
            expected: query.expected.len(),
        });
    }

    let n = scores.len().max(1) as f64;
    let mean_precision = scores.iter().map(|s| s.precision).sum::<f64>() / n;
    let mean_recall = scores.iter().map(|s| s.recall).sum::<f64>() / n;
    let f1 = if mean_precision + mean_recall > 0.0 {
        2.0 * mean_precision * mean_recall / (mean_precision + mean_recall)
    } else {
        0.0
    };

    Ok(EvaluationReport {
        queries: scores,
        mean_precision,
        mean_recall,
        f1,
    })
}
