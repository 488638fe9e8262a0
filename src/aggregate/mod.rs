//! Cycle aggregation: per-record verdicts -> cycle-level statistics.
//!
//! A summary is always computed from the complete record set of a cycle.
//! There is no incremental update; callers recompute from scratch whenever the
//! record set changes.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::classify::is_grand_total_code;
use crate::domain::{AnomalyRule, BillingCategory, ClassifiedRecord, CycleId, CycleSummary, Severity};
use crate::error::EngineError;

/// Summarize one cycle.
///
/// `expected_records` is the number of records submitted for classification
/// in this cycle. Fewer (or more) classified records, a record belonging to
/// another cycle, or the same record twice means the verdict set is not the
/// cycle's full set and no summary is produced.
pub fn summarize(
    cycle: CycleId,
    expected_records: usize,
    classified: &[ClassifiedRecord],
) -> Result<CycleSummary, EngineError> {
    let fail = |reason: String| EngineError::Aggregation { cycle, reason };

    if let Some(stray) = classified.iter().find(|c| c.record.cycle != cycle) {
        return Err(fail(format!(
            "record {} belongs to cycle {}",
            stray.record.code, stray.record.cycle
        )));
    }

    let mut seen = HashSet::with_capacity(classified.len());
    for c in classified {
        if !seen.insert(c.record.id()) {
            return Err(fail(format!(
                "duplicate verdict for {} ({})",
                c.record.code,
                c.record.category.tag()
            )));
        }
    }

    if classified.len() != expected_records {
        return Err(fail(format!(
            "expected {expected_records} verdicts, got {}",
            classified.len()
        )));
    }

    let anomaly_count = classified.iter().filter(|c| c.verdict.is_anomaly).count();
    let total_amount = classified.iter().map(|c| c.record.series.current()).sum();

    Ok(CycleSummary {
        cycle,
        record_count: classified.len(),
        anomaly_count,
        total_amount,
    })
}

/// Per-category slice of a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryBreakdown {
    pub category: BillingCategory,
    pub record_count: usize,
    pub anomaly_count: usize,
    /// Mean avg-vs-current delta over this category's anomalies (where defined).
    pub mean_anomaly_delta: Option<f64>,
    /// Mean avg-vs-current percent over this category's anomalies (where defined).
    pub mean_anomaly_percent: Option<f64>,
}

/// Diagnostic statistics beyond the core summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleBreakdown {
    pub new_code_count: usize,
    pub drop_to_zero_count: usize,
    pub grand_total_count: usize,
    pub threshold_breach_count: usize,
    /// Current billing over every row except grand-total rows, which restate
    /// the other rows' sum. `CycleSummary::total_amount` includes them.
    #[serde(default)]
    pub billed_excluding_grand_totals: f64,
    pub by_severity: BTreeMap<Severity, usize>,
    /// Mean of avg-vs-current deltas over records where the delta is defined.
    pub mean_avg_delta: Option<f64>,
    /// Sample standard deviation of the same deltas (needs at least two).
    pub std_avg_delta: Option<f64>,
    pub categories: Vec<CategoryBreakdown>,
}

/// Rule, severity and category statistics for one cycle.
///
/// Grand-total rows are recognized by `grand_total_label` whichever rule
/// fired for them.
pub fn breakdown(classified: &[ClassifiedRecord], grand_total_label: &str) -> CycleBreakdown {
    let count_rule = |rule: AnomalyRule| classified.iter().filter(|c| c.verdict.rule == Some(rule)).count();

    let mut by_severity: BTreeMap<Severity, usize> = Severity::ALL.into_iter().map(|s| (s, 0)).collect();
    for severity in classified.iter().filter_map(|c| c.verdict.severity) {
        *by_severity.entry(severity).or_default() += 1;
    }

    let deltas: Vec<f64> = classified.iter().filter_map(|c| c.metrics.avg_delta).collect();

    let billed_excluding_grand_totals = classified
        .iter()
        .filter(|c| !is_grand_total_code(&c.record.code, grand_total_label))
        .map(|c| c.record.series.current())
        .sum();

    let categories = BillingCategory::ALL
        .into_iter()
        .filter_map(|category| {
            let rows: Vec<&ClassifiedRecord> = classified.iter().filter(|c| c.record.category == category).collect();
            if rows.is_empty() {
                return None;
            }
            let anomalies: Vec<&ClassifiedRecord> = rows.iter().copied().filter(|c| c.verdict.is_anomaly).collect();
            let anomaly_deltas: Vec<f64> = anomalies.iter().filter_map(|c| c.metrics.avg_delta).collect();
            let anomaly_percents: Vec<f64> = anomalies.iter().filter_map(|c| c.metrics.avg_percent).collect();
            Some(CategoryBreakdown {
                category,
                record_count: rows.len(),
                anomaly_count: anomalies.len(),
                mean_anomaly_delta: mean(&anomaly_deltas),
                mean_anomaly_percent: mean(&anomaly_percents),
            })
        })
        .collect();

    CycleBreakdown {
        new_code_count: count_rule(AnomalyRule::NewCode),
        drop_to_zero_count: count_rule(AnomalyRule::DropToZero),
        grand_total_count: count_rule(AnomalyRule::GrandTotal),
        threshold_breach_count: count_rule(AnomalyRule::ThresholdBreach),
        billed_excluding_grand_totals,
        by_severity,
        mean_avg_delta: mean(&deltas),
        std_avg_delta: sample_std(&deltas),
        categories,
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((ss / (values.len() - 1) as f64).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify_record;
    use crate::domain::{
        AmountSeries, BillingRecord, ClassifierConfig, DEFAULT_GRAND_TOTAL_LABEL, HISTORY_LEN, HistorySlot,
    };

    fn classified(cycle: CycleId, category: BillingCategory, code: &str, history: [Option<f64>; HISTORY_LEN], current: f64) -> ClassifiedRecord {
        let record = BillingRecord {
            cycle,
            category,
            code: code.to_string(),
            description: None,
            series: AmountSeries::new(history.map(HistorySlot::from), current).unwrap(),
        };
        classify_record(record, &ClassifierConfig::default()).unwrap()
    }

    fn cycle() -> CycleId {
        CycleId::new(2025, 3, 14).unwrap()
    }

    fn sample() -> Vec<ClassifiedRecord> {
        let c = cycle();
        vec![
            classified(c, BillingCategory::SingleEventCharges, "SEC1", [Some(200_000.0); HISTORY_LEN], 260_000.0),
            classified(c, BillingCategory::SingleEventCharges, "SEC2", [Some(200_000.0); HISTORY_LEN], 210_000.0),
            classified(c, BillingCategory::AccountCorrections, "ACR1", [None; HISTORY_LEN], 5_000.0),
            classified(c, BillingCategory::LineAddOns, "ADD1", [Some(1_000.0); HISTORY_LEN], 0.0),
        ]
    }

    #[test]
    fn summary_counts_all_records_and_anomalies() {
        let rows = sample();
        let summary = summarize(cycle(), 4, &rows).unwrap();
        assert_eq!(summary.record_count, 4);
        assert_eq!(summary.anomaly_count, 3);
        assert_eq!(summary.anomaly_count, rows.iter().filter(|r| r.verdict.is_anomaly).count());
        assert!((summary.total_amount - 475_000.0).abs() < 1e-9);
    }

    #[test]
    fn incomplete_verdict_set_is_rejected() {
        let rows = sample();
        let err = summarize(cycle(), 5, &rows).unwrap_err();
        assert!(matches!(err, EngineError::Aggregation { .. }));
    }

    #[test]
    fn duplicate_and_foreign_records_are_rejected() {
        let mut rows = sample();
        rows.push(rows[0].clone());
        assert!(summarize(cycle(), 5, &rows).is_err());

        let mut rows = sample();
        rows[1].record.cycle = CycleId::new(2025, 3, 15).unwrap();
        assert!(summarize(cycle(), 4, &rows).is_err());
    }

    #[test]
    fn empty_cycle_summarizes_to_zero() {
        let summary = summarize(cycle(), 0, &[]).unwrap();
        assert_eq!(summary.record_count, 0);
        assert_eq!(summary.total_amount, 0.0);
    }

    #[test]
    fn breakdown_counts_rules_and_categories() {
        let b = breakdown(&sample(), DEFAULT_GRAND_TOTAL_LABEL);
        assert_eq!(b.new_code_count, 1);
        assert_eq!(b.drop_to_zero_count, 1);
        assert_eq!(b.threshold_breach_count, 1);
        assert_eq!(b.grand_total_count, 0);
        assert_eq!(b.by_severity[&Severity::Critical], 2);
        assert_eq!(b.by_severity[&Severity::Low], 1);

        // Deltas: +60k, +10k, -1k (new code has none).
        assert!((b.mean_avg_delta.unwrap() - 23_000.0).abs() < 1e-9);
        assert!(b.std_avg_delta.unwrap() > 0.0);

        assert_eq!(b.categories.len(), 3);
        let sec = &b.categories[0];
        assert_eq!(sec.category, BillingCategory::SingleEventCharges);
        assert_eq!((sec.record_count, sec.anomaly_count), (2, 1));
        assert!((sec.mean_anomaly_delta.unwrap() - 60_000.0).abs() < 1e-9);
        let acr = &b.categories[1];
        assert_eq!(acr.mean_anomaly_delta, None);
        assert!((b.billed_excluding_grand_totals - 475_000.0).abs() < 1e-9);
    }

    #[test]
    fn grand_total_rows_are_billed_once() {
        let c = cycle();
        let mut rows = sample();
        rows.push(classified(c, BillingCategory::SingleEventCharges, "Grand Total", [Some(400_000.0); HISTORY_LEN], 470_000.0));
        // A grand-total row first seen this cycle fires New Code but still restates the sum.
        rows.push(classified(c, BillingCategory::AccountCorrections, " grand total ", [None; HISTORY_LEN], 5_000.0));

        let summary = summarize(c, 6, &rows).unwrap();
        assert!((summary.total_amount - 950_000.0).abs() < 1e-9);

        let b = breakdown(&rows, DEFAULT_GRAND_TOTAL_LABEL);
        assert_eq!(b.grand_total_count, 1);
        assert_eq!(b.new_code_count, 2);
        assert!((b.billed_excluding_grand_totals - 475_000.0).abs() < 1e-9);
    }
}
