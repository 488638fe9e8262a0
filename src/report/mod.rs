//! Reporting utilities: anomaly rankings, code history and terminal output.

mod format;

pub use format::*;

use std::cmp::Ordering;

use serde::Serialize;

use crate::app::pipeline::CycleOutcome;
use crate::domain::{AnomalyRule, BillingCategory, ClassifiedRecord, CycleId};

/// One cycle's view of a billing code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub cycle: CycleId,
    pub category: BillingCategory,
    pub current: f64,
    pub rolling_average: Option<f64>,
    pub avg_delta: Option<f64>,
    pub avg_percent: Option<f64>,
    pub is_anomaly: bool,
    pub rule: Option<AnomalyRule>,
}

/// Track a billing code across processed cycles, newest cycle first.
///
/// A code can appear under several categories; each appearance is an entry.
pub fn code_history(outcomes: &[CycleOutcome], code: &str) -> Vec<HistoryEntry> {
    let code = code.trim();
    let mut entries: Vec<HistoryEntry> = outcomes
        .iter()
        .flat_map(|o| o.records.iter())
        .filter(|c| c.record.code == code)
        .map(|c| HistoryEntry {
            cycle: c.record.cycle,
            category: c.record.category,
            current: c.record.series.current(),
            rolling_average: c.metrics.rolling_average,
            avg_delta: c.metrics.avg_delta,
            avg_percent: c.metrics.avg_percent,
            is_anomaly: c.verdict.is_anomaly,
            rule: c.verdict.rule,
        })
        .collect();

    entries.sort_by(|a, b| b.cycle.cmp(&a.cycle).then(a.category.cmp(&b.category)));
    entries
}

/// Anomalies of one cycle ordered by score (highest first), capped at `top_n`.
///
/// Ties keep category/code order so the table is stable between runs.
pub fn rank_anomalies(records: &[ClassifiedRecord], top_n: usize) -> Vec<&ClassifiedRecord> {
    let mut anomalies: Vec<&ClassifiedRecord> = records.iter().filter(|c| c.verdict.is_anomaly).collect();
    anomalies.sort_by(|a, b| {
        let sa = a.verdict.score.unwrap_or(0.0);
        let sb = b.verdict.score.unwrap_or(0.0);
        sb.partial_cmp(&sa)
            .unwrap_or(Ordering::Equal)
            .then(a.record.category.cmp(&b.record.category))
            .then(a.record.code.cmp(&b.record.code))
    });
    anomalies.truncate(top_n);
    anomalies
}
