//! Anomaly classification.
//!
//! Responsibilities:
//!
//! - look up the record's thresholds (fatal if the table lacks its category)
//! - run the ordered rules (`rules`)
//! - score the hit and bucket it into a severity (`severity`)

pub mod rules;
pub mod severity;

pub use rules::*;
pub use severity::*;

use crate::domain::{AnomalyRule, AnomalyVerdict, BillingRecord, ClassifiedRecord, ClassifierConfig, ComputedMetrics};
use crate::error::EngineError;
use crate::metrics::compute_metrics;

/// Classify one record given its precomputed metrics.
pub fn classify(
    record: &BillingRecord,
    metrics: &ComputedMetrics,
    config: &ClassifierConfig,
) -> Result<AnomalyVerdict, EngineError> {
    let thresholds = config.thresholds.thresholds_for(record.category)?;

    let input = RuleInput {
        record,
        metrics,
        thresholds,
        grand_total_label: &config.grand_total_label,
    };

    let Some(hit) = first_hit(&input) else {
        return Ok(AnomalyVerdict::normal());
    };

    // Categorical rules keep their fixed scores.
    let score = match (&config.jitter, hit.rule) {
        (Some(jitter), AnomalyRule::ThresholdBreach) => apply_jitter(hit.score, jitter, &record.id()),
        _ => hit.score,
    };

    Ok(AnomalyVerdict::flagged(hit.rule, hit.direction, score, hit.reason))
}

/// Metrics then classification for one record.
pub fn classify_record(record: BillingRecord, config: &ClassifierConfig) -> Result<ClassifiedRecord, EngineError> {
    let metrics = compute_metrics(&record.series);
    let verdict = classify(&record, &metrics, config)?;
    Ok(ClassifiedRecord {
        record,
        metrics,
        verdict,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        AmountSeries, AnomalyDirection, BillingCategory, CycleId, HISTORY_LEN, HistorySlot, Severity, SeverityJitter,
    };
    use crate::thresholds::{ThresholdTable, Thresholds};

    fn record(category: BillingCategory, code: &str, history: [Option<f64>; HISTORY_LEN], current: f64) -> BillingRecord {
        BillingRecord {
            cycle: CycleId::new(2025, 2, 11).unwrap(),
            category,
            code: code.to_string(),
            description: None,
            series: AmountSeries::new(history.map(HistorySlot::from), current).unwrap(),
        }
    }

    fn sec(history: [Option<f64>; HISTORY_LEN], current: f64) -> BillingRecord {
        record(BillingCategory::SingleEventCharges, "SEC042", history, current)
    }

    #[test]
    fn spike_above_both_thresholds() {
        let out = classify_record(sec([Some(200_000.0); HISTORY_LEN], 260_000.0), &ClassifierConfig::default()).unwrap();
        assert!((out.metrics.avg_delta.unwrap() - 60_000.0).abs() < 1e-9);
        assert!((out.metrics.avg_percent.unwrap() - 0.30).abs() < 1e-12);
        assert!(out.verdict.is_anomaly);
        assert_eq!(out.verdict.direction, Some(AnomalyDirection::Spike));
        assert_eq!(out.verdict.rule, Some(AnomalyRule::ThresholdBreach));
        assert_eq!(out.verdict.severity, Some(Severity::Low));
    }

    #[test]
    fn small_change_is_not_an_anomaly() {
        let out = classify_record(sec([Some(200_000.0); HISTORY_LEN], 210_000.0), &ClassifierConfig::default()).unwrap();
        assert_eq!(out.verdict, AnomalyVerdict::normal());
        assert!(out.verdict.score.is_none());
        assert!(out.verdict.reason.is_none());
    }

    #[test]
    fn large_percent_below_absolute_floor_is_not_an_anomaly() {
        for current in [0.5, 10_000.0, 45_000.0] {
            let out = classify_record(sec([Some(1_000.0); HISTORY_LEN], current), &ClassifierConfig::default()).unwrap();
            assert!(!out.verdict.is_anomaly, "current={current}");
        }
    }

    #[test]
    fn new_code_fires_regardless_of_magnitude() {
        let out = classify_record(sec([None; HISTORY_LEN], 5_000.0), &ClassifierConfig::default()).unwrap();
        assert!(out.verdict.is_anomaly);
        assert_eq!(out.verdict.direction, Some(AnomalyDirection::Spike));
        assert!(out.verdict.reason.as_deref().unwrap().contains("new code"));
        assert_eq!(out.verdict.severity, Some(Severity::Critical));
    }

    #[test]
    fn never_billed_zero_history_fires_new_code_after_validation() {
        let raw = crate::domain::RawRecord {
            line: Some(7),
            cycle: CycleId::new(2025, 2, 11).unwrap(),
            category: "SEC".to_string(),
            code: "SEC077".to_string(),
            description: None,
            history: vec![Some(0.0); HISTORY_LEN],
            current: 5_000.0,
            new_code: None,
            defect: None,
        };
        let record = crate::domain::validate_record(&raw).unwrap();
        let out = classify_record(record, &ClassifierConfig::default()).unwrap();
        assert!(out.verdict.is_anomaly);
        assert_eq!(out.verdict.rule, Some(AnomalyRule::NewCode));
        assert_eq!(out.verdict.direction, Some(AnomalyDirection::Spike));
        assert!(out.verdict.reason.as_deref().unwrap().contains("new code"));
    }

    #[test]
    fn drop_to_zero_is_flagged_as_drop() {
        let out = classify_record(sec([None, Some(0.0), Some(12.0), None, Some(0.0)], 0.0), &ClassifierConfig::default())
            .unwrap();
        assert!(out.verdict.is_anomaly);
        assert_eq!(out.verdict.direction, Some(AnomalyDirection::Drop));
        assert_eq!(out.verdict.rule, Some(AnomalyRule::DropToZero));
    }

    #[test]
    fn large_drop_uses_category_thresholds() {
        let out = classify_record(
            record(BillingCategory::AccountCorrections, "ACR7", [Some(100_000.0); HISTORY_LEN], 70_000.0),
            &ClassifierConfig::default(),
        )
        .unwrap();
        assert_eq!(out.verdict.direction, Some(AnomalyDirection::Drop));

        // Same move is below the SEC absolute floor.
        let out = classify_record(
            record(BillingCategory::SingleEventCharges, "SEC7", [Some(100_000.0); HISTORY_LEN], 70_000.0),
            &ClassifierConfig::default(),
        )
        .unwrap();
        assert!(!out.verdict.is_anomaly);
    }

    #[test]
    fn grand_total_is_always_reviewed() {
        let out = classify_record(
            record(BillingCategory::SubscriptionPlans, "Grand Total", [Some(9e6); HISTORY_LEN], 9e6),
            &ClassifierConfig::default(),
        )
        .unwrap();
        assert!(out.verdict.is_anomaly);
        assert_eq!(out.verdict.rule, Some(AnomalyRule::GrandTotal));
        assert_eq!(out.verdict.direction, None);
    }

    #[test]
    fn classification_is_idempotent() {
        let config = ClassifierConfig {
            jitter: Some(SeverityJitter { seed: 99, amplitude: 0.2 }),
            ..ClassifierConfig::default()
        };
        let rec = sec([Some(100_000.0), Some(120_000.0), None, Some(90_000.0), Some(110_000.0)], 400_000.0);
        let a = classify_record(rec.clone(), &config).unwrap();
        let b = classify_record(rec, &config).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_category_in_table_is_a_configuration_error() {
        let config = ClassifierConfig {
            thresholds: ThresholdTable::empty()
                .with(BillingCategory::SingleEventCharges, Thresholds::new(1.0, 0.1))
                .unwrap(),
            ..ClassifierConfig::default()
        };
        let rec = record(BillingCategory::LineAddOns, "ADD001", [None; HISTORY_LEN], 1.0);
        let err = classify_record(rec, &config).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn custom_grand_total_label() {
        let config = ClassifierConfig {
            grand_total_label: "TOTAL".to_string(),
            ..ClassifierConfig::default()
        };
        let rec = sec([Some(10.0); HISTORY_LEN], 10.0);
        assert!(!classify_record(rec, &config).unwrap().verdict.is_anomaly);
        let rec = record(BillingCategory::SingleEventCharges, "total", [Some(10.0); HISTORY_LEN], 10.0);
        assert!(classify_record(rec, &config).unwrap().verdict.is_anomaly);
    }
}
