//! CSV exports.
//!
//! - per-record verdicts (metrics + verdict), for spreadsheets and downstream scripts
//! - raw snapshots in the ingest format (used by the sample generator)

use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::app::pipeline::RunOutput;
use crate::domain::{ClassifiedRecord, CycleBatch};
use crate::error::AppError;

#[derive(Debug, Serialize)]
struct VerdictRow<'a> {
    cycle: String,
    year: i32,
    month: u32,
    bill_cycle: u32,
    bill_type: &'a str,
    billing_code: &'a str,
    description: &'a str,
    amount_5_months_ago: Option<f64>,
    amount_4_months_ago: Option<f64>,
    amount_3_months_ago: Option<f64>,
    amount_2_months_ago: Option<f64>,
    amount_1_month_ago: Option<f64>,
    active_month: f64,
    rolling_average: Option<f64>,
    avg_delta: Option<f64>,
    avg_percent: Option<f64>,
    mom_delta: Option<f64>,
    mom_percent: Option<f64>,
    is_anomaly: bool,
    rule: &'a str,
    direction: &'a str,
    severity: &'a str,
    score: Option<f64>,
    reason: &'a str,
}

impl<'a> VerdictRow<'a> {
    fn from_record(c: &'a ClassifiedRecord) -> Self {
        let r = &c.record;
        let h = r.series.history();
        Self {
            cycle: r.cycle.to_string(),
            year: r.cycle.year,
            month: r.cycle.month,
            bill_cycle: r.cycle.number,
            bill_type: r.category.tag(),
            billing_code: &r.code,
            description: r.description.as_deref().unwrap_or(""),
            amount_5_months_ago: h[0].amount(),
            amount_4_months_ago: h[1].amount(),
            amount_3_months_ago: h[2].amount(),
            amount_2_months_ago: h[3].amount(),
            amount_1_month_ago: h[4].amount(),
            active_month: r.series.current(),
            rolling_average: c.metrics.rolling_average,
            avg_delta: c.metrics.avg_delta,
            avg_percent: c.metrics.avg_percent,
            mom_delta: c.metrics.mom_delta,
            mom_percent: c.metrics.mom_percent,
            is_anomaly: c.verdict.is_anomaly,
            rule: c.verdict.rule.map(|x| x.label()).unwrap_or(""),
            direction: c.verdict.direction.map(|x| x.label()).unwrap_or(""),
            severity: c.verdict.severity.map(|x| x.label()).unwrap_or(""),
            score: c.verdict.score,
            reason: c.verdict.reason.as_deref().unwrap_or(""),
        }
    }
}

/// Write one row per classified record (or per anomaly) to a CSV file.
pub fn write_verdicts_csv(path: &Path, run: &RunOutput, anomalies_only: bool) -> Result<usize, AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create export CSV '{}': {e}", path.display())))?;
    write_verdicts(file, run, anomalies_only)
}

pub fn write_verdicts<W: Write>(writer: W, run: &RunOutput, anomalies_only: bool) -> Result<usize, AppError> {
    let mut out = csv::Writer::from_writer(writer);
    let mut written = 0usize;

    for outcome in &run.cycles {
        for c in outcome.records.iter().filter(|c| !anomalies_only || c.verdict.is_anomaly) {
            out.serialize(VerdictRow::from_record(c))
                .map_err(|e| AppError::new(2, format!("Failed to write export CSV row: {e}")))?;
            written += 1;
        }
    }

    out.flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush export CSV: {e}")))?;
    Ok(written)
}

#[derive(Debug, Serialize)]
struct SnapshotRow<'a> {
    year: i32,
    month: u32,
    bill_cycle: u32,
    bill_type: &'a str,
    billing_code: &'a str,
    description: &'a str,
    amount_5_months_ago: Option<f64>,
    amount_4_months_ago: Option<f64>,
    amount_3_months_ago: Option<f64>,
    amount_2_months_ago: Option<f64>,
    amount_1_month_ago: Option<f64>,
    active_month: f64,
    new_code: Option<bool>,
}

/// Write a raw cycle snapshot in the format `io::ingest` reads.
pub fn write_snapshot_csv(path: &Path, batch: &CycleBatch) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create snapshot CSV '{}': {e}", path.display())))?;
    write_snapshot(file, batch)
}

pub fn write_snapshot<W: Write>(writer: W, batch: &CycleBatch) -> Result<(), AppError> {
    let mut out = csv::Writer::from_writer(writer);
    for r in &batch.records {
        let slot = |i: usize| r.history.get(i).copied().flatten();
        out.serialize(SnapshotRow {
            year: r.cycle.year,
            month: r.cycle.month,
            bill_cycle: r.cycle.number,
            bill_type: &r.category,
            billing_code: &r.code,
            description: r.description.as_deref().unwrap_or(""),
            amount_5_months_ago: slot(0),
            amount_4_months_ago: slot(1),
            amount_3_months_ago: slot(2),
            amount_2_months_ago: slot(3),
            amount_1_month_ago: slot(4),
            active_month: r.current,
            new_code: r.new_code,
        })
        .map_err(|e| AppError::new(2, format!("Failed to write snapshot CSV row: {e}")))?;
    }
    out.flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush snapshot CSV: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::pipeline::process_batches;
    use crate::domain::{CycleId, RawRecord, RunConfig};
    use crate::io::ingest::read_cycle_csv;

    fn batch() -> CycleBatch {
        let cycle = CycleId::new(2025, 4, 2).unwrap();
        let raw = |code: &str, history: Vec<Option<f64>>, current: f64| RawRecord {
            line: None,
            cycle,
            category: "SEC".to_string(),
            code: code.to_string(),
            description: Some("desc, with comma".to_string()),
            history,
            current,
            new_code: None,
            defect: None,
        };
        CycleBatch {
            cycle,
            records: vec![
                raw("SEC001", vec![Some(200_000.0); 5], 260_000.0),
                raw("SEC002", vec![Some(200_000.0); 5], 200_000.0),
                raw("SEC003", vec![None, None, None, Some(0.0), Some(10.0)], 12.0),
            ],
        }
    }

    #[test]
    fn snapshot_csv_is_readable_by_ingest() {
        let mut buf = Vec::new();
        write_snapshot(&mut buf, &batch()).unwrap();
        let back = read_cycle_csv(buf.as_slice()).unwrap();
        assert_eq!(back.batches.len(), 1);
        let records = &back.batches[0].records;
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].history, vec![None, None, None, Some(0.0), Some(10.0)]);
        assert_eq!(records[0].description.as_deref(), Some("desc, with comma"));
    }

    #[test]
    fn verdict_export_filters_anomalies() {
        let run = process_batches(vec![batch()], &RunConfig::default()).unwrap();

        let mut all = Vec::new();
        assert_eq!(write_verdicts(&mut all, &run, false).unwrap(), 3);

        let mut only = Vec::new();
        assert_eq!(write_verdicts(&mut only, &run, true).unwrap(), 1);
        let text = String::from_utf8(only).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("cycle,year,month,bill_cycle,bill_type,billing_code"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("04-2-2025,2025,4,2,SEC,SEC001"), "{row}");
        assert!(row.contains("threshold_breach"));
        assert!(row.contains("spike"));
    }
}
