//! Per-factor scoring functions for the reranker.
//!
//!   TypeWeight(m)       = 1 if no preference, type preferred or unknown; else penalty
//!   ImportanceWeight(m) = floor + (1 − floor) · clamp(importance · e^(−λ · age), 0, 1)

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::decay;
use crate::params::SearchParameters;
use crate::retrieval::ScoreBreakdown;
use crate::types::{MemoryPayload, MemoryType};

/// Compute the full score breakdown for a single payload.
#[must_use]
pub fn compute_breakdown(
    payload: &MemoryPayload,
    preferred_types: Option<&HashSet<MemoryType>>,
    params: &SearchParameters,
    now: DateTime<Utc>,
) -> ScoreBreakdown {
    let age_days = decay::age_days(payload.created_at, now);
    let decayed = decay::decayed_importance(stored_importance(payload), params.decay_lambda(), age_days);

    ScoreBreakdown {
        age_days,
        decayed_importance: decayed,
        importance_weight: decay::importance_weight(decayed, params.importance_floor()),
        type_weight: type_weight(payload.memory_type, preferred_types, params.type_mismatch_penalty()),
    }
}

/// Type multiplier. Unknown types are never penalised.
#[must_use]
pub fn type_weight(
    memory_type: Option<MemoryType>,
    preferred_types: Option<&HashSet<MemoryType>>,
    penalty: f64,
) -> f64 {
    match (memory_type, preferred_types) {
        (Some(t), Some(preferred)) if !preferred.is_empty() && !preferred.contains(&t) => penalty,
        _ => 1.0,
    }
}

/// Missing or non-finite importance counts as 0.
fn stored_importance(payload: &MemoryPayload) -> f64 {
    payload.importance.filter(|v| v.is_finite()).unwrap_or(0.0)
}
