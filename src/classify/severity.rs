//! Severity scoring.
//!
//! Scores live in `[0, 1]` and are bucketed by `Severity::from_score`.
//!
//! - Magnitude breaches are scored from how far the change overshoots both
//!   thresholds: `ratio = (|delta| / absolute + |percent| / percent_threshold) / 2`.
//!   A ratio of `1` (exactly at the thresholds) scores `0`; a ratio of
//!   [`SATURATION_RATIO`] or more scores `1`.
//! - Categorical rules carry fixed scores.

use rand::prelude::*;
use rand::rngs::StdRng;

use crate::domain::{RecordId, SeedMixer, SeverityJitter};
use crate::thresholds::Thresholds;

/// Breach ratio at which the score saturates at `1.0`.
pub const SATURATION_RATIO: f64 = 4.0;

/// New code and drop-to-zero are total discontinuities.
pub const NEW_CODE_SCORE: f64 = 1.0;
pub const DROP_TO_ZERO_SCORE: f64 = 1.0;
/// Grand-total rows are reviewed regardless of magnitude.
pub const GRAND_TOTAL_SCORE: f64 = 0.5;

/// Equal-weighted overshoot of both thresholds.
pub fn breach_ratio(delta: f64, percent: f64, thresholds: &Thresholds) -> f64 {
    let abs_ratio = delta.abs() / thresholds.absolute_change;
    let pct_ratio = percent.abs() / thresholds.percent_change;
    (abs_ratio + pct_ratio) / 2.0
}

pub fn breach_score(delta: f64, percent: f64, thresholds: &Thresholds) -> f64 {
    let ratio = breach_ratio(delta, percent, thresholds);
    if !ratio.is_finite() {
        return 1.0;
    }
    ((ratio - 1.0) / (SATURATION_RATIO - 1.0)).clamp(0.0, 1.0)
}

/// Apply the configured jitter to `score`.
///
/// The offset is drawn from an RNG seeded by `(seed, record id)`, so reruns of
/// the same input reproduce the same scores.
pub fn apply_jitter(score: f64, jitter: &SeverityJitter, id: &RecordId) -> f64 {
    let amplitude = jitter.amplitude.abs();
    if !(amplitude.is_finite() && amplitude > 0.0) {
        return score;
    }
    let mut rng = StdRng::seed_from_u64(jitter_seed(jitter.seed, id));
    let offset = rng.gen_range(-amplitude..=amplitude);
    (score + offset).clamp(0.0, 1.0)
}

fn jitter_seed(seed: u64, id: &RecordId) -> u64 {
    SeedMixer::new()
        .u64(seed)
        .i32(id.cycle.year)
        .u32(id.cycle.month)
        .u32(id.cycle.number)
        .str(id.category.tag())
        .str(&id.code)
        .finish()
}
