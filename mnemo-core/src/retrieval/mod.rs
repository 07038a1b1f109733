//! Memory Retrieval — decay and soft-penalty reranking of fused candidates.
//!
//! ```text
//!   score = fusion_score × type_weight × importance_weight
//! ```
//!
//! Penalties are multiplicative and never remove a candidate: a memory of a
//! non-preferred type, or an old unimportant one, is pushed down the list but
//! stays rankable. Only the final `top_k` truncation shortens the list.

pub mod scoring;

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::params::SearchParameters;
use crate::types::{FusedCandidate, MemoryId, MemoryPayload, MemoryType};

/// A reranked candidate with its scoring trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    /// Memory identifier.
    pub id: MemoryId,
    /// The stored record.
    pub payload: MemoryPayload,
    /// Score after fusion, before penalties.
    pub fusion_score: f64,
    /// Final score after penalties.
    pub score: f64,
    /// Per-factor breakdown (useful for debugging and tuning).
    pub breakdown: ScoreBreakdown,
}

/// Breakdown of a final score into its multiplicative factors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    /// Whole days since the memory was formed.
    pub age_days: u32,
    /// Importance after exponential decay.
    pub decayed_importance: f64,
    /// Floored importance multiplier in `[importance_floor, 1]`.
    pub importance_weight: f64,
    /// `1.0` or the type mismatch penalty.
    pub type_weight: f64,
}

impl ScoreBreakdown {
    /// Product of the penalty factors.
    #[must_use]
    pub fn multiplier(&self) -> f64 {
        self.type_weight * self.importance_weight
    }
}

/// Apply decay and type penalties to fused candidates, then keep the best `top_k`.
///
/// Ordering is by final score, then fusion score (both descending), then
/// identifier ascending, matching the fusion tie-break. `preferred_types`
/// of `None` or an empty set disables the type penalty.
#[must_use]
pub fn rerank(
    fused: &[FusedCandidate],
    top_k: usize,
    preferred_types: Option<&HashSet<MemoryType>>,
    params: &SearchParameters,
    now: DateTime<Utc>,
) -> Vec<RetrievalResult> {
    if top_k == 0 {
        return Vec::new();
    }

    let mut results: Vec<RetrievalResult> = fused
        .iter()
        .map(|candidate| {
            let breakdown =
                scoring::compute_breakdown(&candidate.payload, preferred_types, params, now);
            RetrievalResult {
                id: candidate.id.clone(),
                payload: candidate.payload.clone(),
                fusion_score: candidate.fusion_score,
                score: candidate.fusion_score * breakdown.multiplier(),
                breakdown,
            }
        })
        .collect();

    results.sort_by(compare_results);
    results.truncate(top_k);
    results
}

/// Descending by score, then fusion score; ascending identifier last.
fn compare_results(a: &RetrievalResult, b: &RetrievalResult) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.fusion_score.total_cmp(&a.fusion_score))
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0)
            .single()
            .expect("valid date")
    }

    fn fused(id: &str, score: f64, memory_type: MemoryType, importance: f64, age: i64) -> FusedCandidate {
        FusedCandidate {
            id: MemoryId::new(id),
            fusion_score: score,
            payload: MemoryPayload::new(
                format!("memory {id}"),
                memory_type,
                importance,
                now() - Duration::days(age),
            ),
        }
    }

    #[test]
    fn soft_penalty_reorders_but_keeps_everything() {
        let input = vec![
            fused("combat", 0.033, MemoryType::Combat, 1.0, 0),
            fused("trade", 0.030, MemoryType::Trade, 1.0, 0),
        ];
        let preferred: HashSet<MemoryType> = [MemoryType::Trade].into_iter().collect();
        let out = rerank(&input, 10, Some(&preferred), &SearchParameters::default(), now());

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id.as_str(), "trade");
        assert!((out[1].breakdown.type_weight - 0.35).abs() < 1e-12);
        assert!((out[1].score - 0.033 * 0.35).abs() < 1e-12);
    }

    #[test]
    fn no_preference_means_no_type_penalty() {
        let input = vec![fused("a", 0.02, MemoryType::Gift, 1.0, 0)];
        let empty = HashSet::new();
        for prefs in [None, Some(&empty)] {
            let out = rerank(&input, 5, prefs, &SearchParameters::default(), now());
            assert!((out[0].breakdown.type_weight - 1.0).abs() < 1e-12);
            assert!((out[0].score - 0.02).abs() < 1e-12);
        }
    }

    #[test]
    fn old_memory_decays_toward_floor() {
        let params = SearchParameters::default();
        let input = vec![fused("old", 0.02, MemoryType::Quest, 0.8, 100)];
        let out = rerank(&input, 5, None, &params, now());
        let b = out[0].breakdown;
        assert_eq!(b.age_days, 100);
        assert!((b.decayed_importance - 0.8 * (-1.0_f64).exp()).abs() < 1e-12);
        assert!((b.importance_weight - (0.2 + 0.8 * b.decayed_importance)).abs() < 1e-12);
    }

    #[test]
    fn ties_break_by_fusion_then_identifier() {
        let params = SearchParameters::default();
        let b = fused("b", 0.01, MemoryType::Quest, 1.0, 0);
        let a = fused("a", 0.01, MemoryType::Quest, 1.0, 0);
        let out = rerank(&[b, a], 5, None, &params, now());
        assert_eq!(out[0].id.as_str(), "a");
        assert_eq!(out[1].id.as_str(), "b");

        // Same final score, higher fusion score wins.
        let strong = fused("z", 0.02, MemoryType::Quest, 1.0, 0);
        let mut weak = fused("y", 0.04, MemoryType::Quest, 1.0, 0);
        weak.payload.importance = Some(0.0);
        let floor = SearchParameters::default()
            .with(crate::params::ParameterField::ImportanceFloor, 0.5)
            .expect("valid");
        let out = rerank(&[strong, weak], 5, None, &floor, now());
        assert!((out[0].score - out[1].score).abs() < 1e-12);
        assert_eq!(out[0].id.as_str(), "y");
    }

    #[test]
    fn truncates_to_top_k_and_handles_zero() {
        let input: Vec<FusedCandidate> = (0..10)
            .map(|i| fused(&format!("m{i}"), 0.01 * f64::from(i), MemoryType::Dialogue, 0.5, 0))
            .collect();
        let params = SearchParameters::default();
        assert_eq!(rerank(&input, 3, None, &params, now()).len(), 3);
        assert!(rerank(&input, 0, None, &params, now()).is_empty());
        assert!(rerank(&[], 3, None, &params, now()).is_empty());
    }

    #[test]
    fn malformed_payload_gets_safe_defaults() {
        let input = vec![FusedCandidate {
            id: MemoryId::new("bare"),
            fusion_score: 0.02,
            payload: MemoryPayload::default(),
        }];
        let preferred: HashSet<MemoryType> = [MemoryType::Trade].into_iter().collect();
        let out = rerank(&input, 5, Some(&preferred), &SearchParameters::default(), now());
        let b = out[0].breakdown;
        assert_eq!(b.age_days, 0);
        assert!((b.decayed_importance).abs() < 1e-12);
        assert!((b.importance_weight - 0.2).abs() < 1e-12);
        assert!((b.type_weight - 1.0).abs() < 1e-12);
    }
}
