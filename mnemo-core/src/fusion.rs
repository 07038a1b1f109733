//! Reciprocal Rank Fusion — merges the lexical and vector channels.
//!
//! ```text
//!   RRF(d) = Σ_lists 1 / (k + rank_list(d))        ranks are 1-based
//! ```
//!
//! Fusion is rank-only: engine scores are never read, so the incomparable
//! scales of BM25 and cosine similarity cannot leak into the ranking.
//! Ties are broken by identifier so the output is fully deterministic.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{MnemoError, Result};
use crate::params::SearchParameters;
use crate::types::{FusedCandidate, MemoryId, MemoryPayload, RankedList};

/// Standard RRF constant from Cormack et al. (2009).
pub const DEFAULT_RRF_K: f64 = 60.0;

/// Which fusion formula the pipeline applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMode {
    /// Plain RRF; channel weights are ignored.
    #[default]
    Rrf,
    /// RRF with each channel's term scaled by its weight.
    WeightedRrf,
}

/// Per-channel multipliers for weighted RRF.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelWeights {
    /// Weight for the first (lexical) list.
    pub lexical: f64,
    /// Weight for the second (vector) list.
    pub vector: f64,
}

impl ChannelWeights {
    /// Both channels count fully (plain RRF).
    pub const EQUAL: Self = Self {
        lexical: 1.0,
        vector: 1.0,
    };

    /// Take `bm25_weight` / `vector_weight` from a parameter set.
    #[must_use]
    pub fn from_params(params: &SearchParameters) -> Self {
        Self {
            lexical: params.bm25_weight(),
            vector: params.vector_weight(),
        }
    }
}

struct Accumulator<'a> {
    score: f64,
    payload: &'a MemoryPayload,
}

/// Fuse two ranked lists with plain RRF.
///
/// The payload of an identifier present in both lists is taken from `a`.
///
/// # Errors
/// Returns [`MnemoError::InvalidParameter`] if `k` is not finite and positive.
pub fn fuse(a: &RankedList, b: &RankedList, limit: usize, k: f64) -> Result<Vec<FusedCandidate>> {
    fuse_weighted(a, b, limit, k, ChannelWeights::EQUAL)
}

/// Fuse two ranked lists, scaling each list's RRF term by its weight.
///
/// # Errors
/// Returns [`MnemoError::InvalidParameter`] if `k` is not finite and positive
/// or a weight is negative or not finite.
pub fn fuse_weighted(
    a: &RankedList,
    b: &RankedList,
    limit: usize,
    k: f64,
    weights: ChannelWeights,
) -> Result<Vec<FusedCandidate>> {
    if !k.is_finite() || k <= 0.0 {
        return Err(MnemoError::InvalidParameter {
            field: "rrf_k",
            value: k,
            min: f64::MIN_POSITIVE,
            max: f64::MAX,
        });
    }
    for (field, w) in [("bm25_weight", weights.lexical), ("vector_weight", weights.vector)] {
        if !w.is_finite() || w < 0.0 {
            return Err(MnemoError::InvalidParameter {
                field,
                value: w,
                min: 0.0,
                max: f64::MAX,
            });
        }
    }
    if limit == 0 {
        return Ok(Vec::new());
    }

    let mut scores: HashMap<&MemoryId, Accumulator<'_>> = HashMap::with_capacity(a.len() + b.len());
    for (list, weight) in [(a, weights.lexical), (b, weights.vector)] {
        // A repeated identifier keeps its first (best) rank.
        let mut seen: HashSet<&MemoryId> = HashSet::with_capacity(list.len());
        for (rank, candidate) in list.ranked() {
            if !seen.insert(&candidate.id) {
                continue;
            }
            let term = weight / (k + rank as f64);
            scores
                .entry(&candidate.id)
                .and_modify(|acc| acc.score += term)
                .or_insert(Accumulator {
                    score: term,
                    payload: &candidate.payload,
                });
        }
    }

    let mut fused: Vec<(&MemoryId, Accumulator<'_>)> = scores.into_iter().collect();
    fused.sort_by(|(id_a, x), (id_b, y)| y.score.total_cmp(&x.score).then_with(|| id_a.cmp(id_b)));
    fused.truncate(limit);

    Ok(fused
        .into_iter()
        .map(|(id, acc)| FusedCandidate {
            id: id.clone(),
            fusion_score: acc.score,
            payload: acc.payload.clone(),
        })
        .collect())
}

/// Fuse with the RRF constant (and, in weighted mode, channel weights) taken
/// from `params`.
///
/// # Errors
/// Propagates [`fuse_weighted`] validation errors.
pub fn fuse_with_params(
    lexical: &RankedList,
    vector: &RankedList,
    limit: usize,
    params: &SearchParameters,
    mode: FusionMode,
) -> Result<Vec<FusedCandidate>> {
    let weights = match mode {
        FusionMode::Rrf => ChannelWeights::EQUAL,
        FusionMode::WeightedRrf => ChannelWeights::from_params(params),
    };
    fuse_weighted(lexical, vector, limit, params.rrf_k(), weights)
}
