//! Search Parameter Set — the six tunables shared by the ranking pipeline and
//! the genetic optimizer.
//!
//! Values are validated at every entry point (constructor, map, serde), so a
//! `SearchParameters` in hand is always within bounds. Mutation and crossover
//! produce new values and never touch the original.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{MnemoError, Result};

// ---------------------------------------------------------------------------
// Fields & bounds
// ---------------------------------------------------------------------------

/// One of the six tunable fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterField {
    /// RRF smoothing constant `k`.
    RrfK,
    /// Exponential decay rate per day.
    DecayLambda,
    /// Minimum importance multiplier.
    ImportanceFloor,
    /// Multiplier applied when the memory type is not preferred.
    TypeMismatchPenalty,
    /// Lexical channel weight (weighted RRF only).
    Bm25Weight,
    /// Vector channel weight (weighted RRF only).
    VectorWeight,
}

impl ParameterField {
    /// All fields in canonical order.
    pub const ALL: [ParameterField; 6] = [
        Self::RrfK,
        Self::DecayLambda,
        Self::ImportanceFloor,
        Self::TypeMismatchPenalty,
        Self::Bm25Weight,
        Self::VectorWeight,
    ];

    /// Serialized field name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::RrfK => "rrf_k",
            Self::DecayLambda => "decay_lambda",
            Self::ImportanceFloor => "importance_floor",
            Self::TypeMismatchPenalty => "type_mismatch_penalty",
            Self::Bm25Weight => "bm25_weight",
            Self::VectorWeight => "vector_weight",
        }
    }

    /// Hard `(min, max)` bounds, inclusive.
    #[must_use]
    pub fn bounds(self) -> (f64, f64) {
        match self {
            Self::RrfK => (1.0, 200.0),
            Self::DecayLambda => (0.001, 0.1),
            Self::ImportanceFloor => (0.0, 0.5),
            Self::TypeMismatchPenalty => (0.1, 0.9),
            Self::Bm25Weight | Self::VectorWeight => (0.0, 1.0),
        }
    }

    /// Production-realistic seeding range, tighter than the hard bounds.
    #[must_use]
    pub fn seed_range(self) -> (f64, f64) {
        match self {
            Self::RrfK => (20.0, 100.0),
            Self::DecayLambda => (0.005, 0.05),
            Self::ImportanceFloor => (0.1, 0.4),
            Self::TypeMismatchPenalty => (0.2, 0.6),
            Self::Bm25Weight | Self::VectorWeight => (0.3, 0.7),
        }
    }

    /// Look a field up by its serialized name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    fn default_value(self) -> f64 {
        SearchParameters::default().get(self)
    }

    fn check(self, value: f64) -> Result<f64> {
        let (min, max) = self.bounds();
        if value.is_finite() && (min..=max).contains(&value) {
            Ok(value)
        } else {
            Err(MnemoError::InvalidParameter {
                field: self.name(),
                value,
                min,
                max,
            })
        }
    }

    fn clamp(self, value: f64) -> f64 {
        let (min, max) = self.bounds();
        value.clamp(min, max)
    }
}

// ---------------------------------------------------------------------------
// SearchParameters
// ---------------------------------------------------------------------------

/// The fusion / decay / penalty configuration consumed by one search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ParameterMap", into = "ParameterMap")]
pub struct SearchParameters {
    rrf_k: f64,
    decay_lambda: f64,
    importance_floor: f64,
    type_mismatch_penalty: f64,
    bm25_weight: f64,
    vector_weight: f64,
}

/// Flat field-name → value mapping used for serialization.
pub type ParameterMap = BTreeMap<String, f64>;

impl Default for SearchParameters {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            decay_lambda: 0.01,
            importance_floor: 0.2,
            type_mismatch_penalty: 0.35,
            bm25_weight: 0.5,
            vector_weight: 0.5,
        }
    }
}

impl SearchParameters {
    /// Build a validated parameter set.
    ///
    /// # Errors
    /// Returns [`MnemoError::InvalidParameter`] for the first field outside its bounds.
    pub fn new(
        rrf_k: f64,
        decay_lambda: f64,
        importance_floor: f64,
        type_mismatch_penalty: f64,
        bm25_weight: f64,
        vector_weight: f64,
    ) -> Result<Self> {
        Ok(Self {
            rrf_k: ParameterField::RrfK.check(rrf_k)?,
            decay_lambda: ParameterField::DecayLambda.check(decay_lambda)?,
            importance_floor: ParameterField::ImportanceFloor.check(importance_floor)?,
            type_mismatch_penalty: ParameterField::TypeMismatchPenalty
                .check(type_mismatch_penalty)?,
            bm25_weight: ParameterField::Bm25Weight.check(bm25_weight)?,
            vector_weight: ParameterField::VectorWeight.check(vector_weight)?,
        })
    }

    /// RRF smoothing constant.
    #[must_use]
    pub fn rrf_k(&self) -> f64 {
        self.rrf_k
    }

    /// Decay rate per day.
    #[must_use]
    pub fn decay_lambda(&self) -> f64 {
        self.decay_lambda
    }

    /// Minimum importance multiplier.
    #[must_use]
    pub fn importance_floor(&self) -> f64 {
        self.importance_floor
    }

    /// Type mismatch multiplier.
    #[must_use]
    pub fn type_mismatch_penalty(&self) -> f64 {
        self.type_mismatch_penalty
    }

    /// Lexical channel weight.
    #[must_use]
    pub fn bm25_weight(&self) -> f64 {
        self.bm25_weight
    }

    /// Vector channel weight.
    #[must_use]
    pub fn vector_weight(&self) -> f64 {
        self.vector_weight
    }

    /// Read one field.
    #[must_use]
    pub fn get(&self, field: ParameterField) -> f64 {
        match field {
            ParameterField::RrfK => self.rrf_k,
            ParameterField::DecayLambda => self.decay_lambda,
            ParameterField::ImportanceFloor => self.importance_floor,
            ParameterField::TypeMismatchPenalty => self.type_mismatch_penalty,
            ParameterField::Bm25Weight => self.bm25_weight,
            ParameterField::VectorWeight => self.vector_weight,
        }
    }

    /// Copy with one field replaced.
    ///
    /// # Errors
    /// Returns [`MnemoError::InvalidParameter`] if `value` is out of bounds.
    pub fn with(self, field: ParameterField, value: f64) -> Result<Self> {
        let value = field.check(value)?;
        Ok(self.set_unchecked(field, value))
    }

    /// Caller guarantees `value` is within bounds.
    fn set_unchecked(mut self, field: ParameterField, value: f64) -> Self {
        match field {
            ParameterField::RrfK => self.rrf_k = value,
            ParameterField::DecayLambda => self.decay_lambda = value,
            ParameterField::ImportanceFloor => self.importance_floor = value,
            ParameterField::TypeMismatchPenalty => self.type_mismatch_penalty = value,
            ParameterField::Bm25Weight => self.bm25_weight = value,
            ParameterField::VectorWeight => self.vector_weight = value,
        }
        self
    }

    /// Draw every field uniformly from its production-realistic seed range.
    pub fn random_seed<R: Rng + ?Sized>(rng: &mut R) -> Self {
        ParameterField::ALL
            .into_iter()
            .fold(Self::default(), |params, field| {
                let (lo, hi) = field.seed_range();
                params.set_unchecked(field, rng.gen_range(lo..=hi))
            })
    }

    /// Perturb each field with probability `rate` by a uniform relative delta
    /// in `[-strength, +strength] × value`, clamped to the field's bounds.
    ///
    /// A field sitting at exactly zero stays at zero (the delta is relative).
    #[must_use]
    pub fn mutate<R: Rng + ?Sized>(&self, rate: f64, strength: f64, rng: &mut R) -> Self {
        let rate = if rate.is_finite() { rate.clamp(0.0, 1.0) } else { 0.0 };
        let strength = if strength.is_finite() { strength.abs() } else { 0.0 };
        ParameterField::ALL
            .into_iter()
            .fold(*self, |params, field| {
                if !rng.gen_bool(rate) {
                    return params;
                }
                let value = params.get(field);
                let delta = rng.gen_range(-strength..=strength) * value;
                params.set_unchecked(field, field.clamp(value + delta))
            })
    }

    /// Uniform crossover: each field comes from `p1` or `p2` with equal
    /// probability.
    #[must_use]
    pub fn crossover<R: Rng + ?Sized>(p1: &Self, p2: &Self, rng: &mut R) -> Self {
        ParameterField::ALL
            .into_iter()
            .fold(*p1, |params, field| {
                let source = if rng.gen_bool(0.5) { p1 } else { p2 };
                params.set_unchecked(field, source.get(field))
            })
    }

    /// Flat field → value mapping.
    #[must_use]
    pub fn to_map(&self) -> ParameterMap {
        ParameterField::ALL
            .into_iter()
            .map(|f| (f.name().to_string(), self.get(f)))
            .collect()
    }

    /// Rebuild from a flat mapping. Missing keys take their defaults.
    ///
    /// # Errors
    /// Returns [`MnemoError::UnknownParameter`] for an unrecognised key and
    /// [`MnemoError::InvalidParameter`] for an out-of-bounds value.
    pub fn from_map(map: &ParameterMap) -> Result<Self> {
        if let Some(unknown) = map.keys().find(|k| ParameterField::from_name(k).is_none()) {
            return Err(MnemoError::UnknownParameter(unknown.clone()));
        }
        ParameterField::ALL.into_iter().try_fold(Self::default(), |params, field| {
            let value = map
                .get(field.name())
                .copied()
                .unwrap_or_else(|| field.default_value());
            params.with(field, value)
        })
    }

    /// Whether every field lies within its hard bounds.
    #[must_use]
    pub fn is_within_bounds(&self) -> bool {
        ParameterField::ALL
            .into_iter()
            .all(|f| f.check(self.get(f)).is_ok())
    }
}

impl TryFrom<ParameterMap> for SearchParameters {
    type Error = MnemoError;

    fn try_from(map: ParameterMap) -> Result<Self> {
        Self::from_map(&map)
    }
}

impl From<SearchParameters> for ParameterMap {
    fn from(params: SearchParameters) -> Self {
        params.to_map()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn defaults_are_in_bounds() {
        assert!(SearchParameters::default().is_within_bounds());
    }

    #[test]
    fn constructor_rejects_out_of_bounds() {
        let err = SearchParameters::new(0.5, 0.01, 0.2, 0.35, 0.5, 0.5).expect_err("out of bounds");
        assert!(matches!(err, MnemoError::InvalidParameter { field: "rrf_k", .. }));

        let err = SearchParameters::new(60.0, f64::NAN, 0.2, 0.35, 0.5, 0.5).expect_err("out of bounds");
        assert!(matches!(err, MnemoError::InvalidParameter { field: "decay_lambda", .. }));
    }

    #[test]
    fn map_round_trip() {
        let params = SearchParameters::new(42.0, 0.02, 0.1, 0.5, 0.6, 0.4).expect("valid");
        let map = params.to_map();
        assert_eq!(map.len(), 6);
        assert_eq!(SearchParameters::from_map(&map).expect("round trip"), params);
    }

    #[test]
    fn from_map_fills_missing_with_defaults() {
        let mut map = ParameterMap::new();
        map.insert("rrf_k".into(), 80.0);
        let params = SearchParameters::from_map(&map).expect("partial map");
        assert!((params.rrf_k() - 80.0).abs() < f64::EPSILON);
        assert!((params.decay_lambda() - 0.01).abs() < f64::EPSILON);
    }

    #[test]
    fn from_map_rejects_unknown_keys() {
        let mut map = ParameterMap::new();
        map.insert("rrf_kk".into(), 80.0);
        assert!(matches!(
            SearchParameters::from_map(&map),
            Err(MnemoError::UnknownParameter(k)) if k == "rrf_kk"
        ));
    }

    #[test]
    fn serde_validates_on_deserialize() {
        let ok: SearchParameters =
            serde_json::from_str(r#"{"rrf_k": 30.0, "decay_lambda": 0.05}"#).expect("valid json");
        assert!((ok.rrf_k() - 30.0).abs() < f64::EPSILON);

        let bad = serde_json::from_str::<SearchParameters>(r#"{"importance_floor": 0.9}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn mutate_with_zero_rate_is_identity() {
        let mut rng = StdRng::seed_from_u64(1);
        let params = SearchParameters::default();
        assert_eq!(params.mutate(0.0, 0.5, &mut rng), params);
    }

    #[test]
    fn mutate_with_full_rate_changes_and_stays_bounded() {
        let mut rng = StdRng::seed_from_u64(2);
        let params = SearchParameters::default();
        let mutated = params.mutate(1.0, 0.5, &mut rng);
        assert_ne!(mutated, params);
        assert!(mutated.is_within_bounds());
        // Original is untouched.
        assert_eq!(params, SearchParameters::default());
    }

    #[test]
    fn crossover_takes_each_field_from_a_parent() {
        let mut rng = StdRng::seed_from_u64(3);
        let p1 = SearchParameters::new(10.0, 0.002, 0.0, 0.1, 0.0, 0.0).expect("valid");
        let p2 = SearchParameters::new(190.0, 0.09, 0.5, 0.9, 1.0, 1.0).expect("valid");
        for _ in 0..50 {
            let child = SearchParameters::crossover(&p1, &p2, &mut rng);
            for field in ParameterField::ALL {
                let v = child.get(field);
                assert!(v == p1.get(field) || v == p2.get(field));
            }
        }
    }

    #[test]
    fn random_seed_respects_seed_ranges() {
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..100 {
            let params = SearchParameters::random_seed(&mut rng);
            for field in ParameterField::ALL {
                let (lo, hi) = field.seed_range();
                let v = params.get(field);
                assert!((lo..=hi).contains(&v), "{} = {v}", field.name());
            }
        }
    }
}
