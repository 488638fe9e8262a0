//! Metric calculator: trend features for one amount series.
//!
//! Pure functions of their input. No rounding happens here; rounding is a
//! presentation concern handled by `report` and `io::export`.

use crate::domain::{AmountSeries, ComputedMetrics};

/// Compute rolling average, month-over-month and average-vs-current changes.
pub fn compute_metrics(series: &AmountSeries) -> ComputedMetrics {
    let current = series.current();

    let rolling_average = rolling_average(series);
    let (mom_delta, mom_percent) = change(current, series.most_recent().amount());
    let (avg_delta, avg_percent) = change(current, rolling_average);

    ComputedMetrics {
        rolling_average,
        mom_delta,
        mom_percent,
        avg_delta,
        avg_percent,
    }
}

/// Mean of the historical slots that exist. Missing slots are excluded from
/// both sum and count; `None` when every slot is missing.
pub fn rolling_average(series: &AmountSeries) -> Option<f64> {
    let (sum, count) = series
        .present_values()
        .fold((0.0_f64, 0usize), |(sum, n), v| (sum + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Absolute and relative change of `current` against `reference`.
///
/// The relative change is only defined for a strictly positive reference.
fn change(current: f64, reference: Option<f64>) -> (Option<f64>, Option<f64>) {
    let Some(reference) = reference else {
        return (None, None);
    };
    let delta = current - reference;
    let percent = (reference > 0.0).then(|| delta / reference);
    (Some(delta), percent)
}
