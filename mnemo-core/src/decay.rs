//! Importance Decay — exponential forgetting of stored importance.
//!
//! ```text
//!   decayed = importance × e^(−λ · age_days)
//!   weight  = floor + (1 − floor) × clamp(decayed, 0, 1)
//! ```
//!
//! `age_days` is measured in whole days (floored) and never negative: a
//! record stamped in the future counts as brand new. The floor keeps old or
//! unimportant memories rankable instead of collapsing their score to zero.

use chrono::{DateTime, Utc};

/// Whole days elapsed between `created_at` and `now`, never negative.
///
/// A missing timestamp counts as age 0 (no decay).
#[must_use]
pub fn age_days(created_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> u32 {
    let Some(created_at) = created_at else {
        return 0;
    };
    let days = now.signed_duration_since(created_at).num_days();
    u32::try_from(days.max(0)).unwrap_or(u32::MAX)
}

/// Exponentially decayed importance: `importance × e^(−λ · age_days)`.
///
/// Never exceeds the input importance for non-negative λ.
#[must_use]
pub fn decayed_importance(importance: f64, decay_lambda: f64, age_days: u32) -> f64 {
    importance * (-decay_lambda * f64::from(age_days)).exp()
}

/// Map a (decayed) importance to a multiplicative weight in `[floor, 1]`.
///
/// Non-finite importance is treated as 0.
#[must_use]
pub fn importance_weight(importance: f64, floor: f64) -> f64 {
    let x = if importance.is_finite() {
        importance.clamp(0.0, 1.0)
    } else {
        0.0
    };
    floor + (1.0 - floor) * x
}
