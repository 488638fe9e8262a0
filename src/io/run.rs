//! Read/write run report JSON.
//!
//! The run report is the portable record of a processing run:
//! - the configuration that produced it (thresholds, grand-total label)
//! - every cycle's classified records, rejections and summary
//!
//! Notes and history queries read it back instead of reclassifying.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::pipeline::RunOutput;
use crate::domain::{BillingCategory, ClassifiedRecord, ClassifierConfig, RecordId};
use crate::error::AppError;
use crate::thresholds::Thresholds;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub tool: String,
    pub generated_at: DateTime<Utc>,
    pub grand_total_label: String,
    pub thresholds: BTreeMap<BillingCategory, Thresholds>,
    pub run: RunOutput,
}

impl RunReport {
    pub fn new(run: RunOutput, classifier: &ClassifierConfig) -> Self {
        Self {
            tool: env!("CARGO_PKG_NAME").to_string(),
            generated_at: Utc::now(),
            grand_total_label: classifier.grand_total_label.clone(),
            thresholds: classifier.thresholds.iter().collect(),
            run,
        }
    }

    pub fn find(&self, id: &RecordId) -> Option<&ClassifiedRecord> {
        self.run
            .cycle(id.cycle)?
            .records
            .iter()
            .find(|r| r.record.category == id.category && r.record.code == id.code)
    }
}

pub fn write_run_json(path: &Path, report: &RunReport) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create run JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)
        .map_err(|e| AppError::new(2, format!("Failed to write run JSON: {e}")))?;
    Ok(())
}

pub fn read_run_json(path: &Path) -> Result<RunReport, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open run JSON '{}': {e}", path.display())))?;
    let report: RunReport = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| AppError::new(2, format!("Invalid run JSON: {e}")))?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::pipeline::process_batches;
    use crate::domain::{CycleBatch, CycleId, RawRecord, RunConfig};

    #[test]
    fn run_report_round_trip_and_lookup() {
        let cycle = CycleId::new(2025, 1, 8).unwrap();
        let batch = CycleBatch {
            cycle,
            records: vec![RawRecord {
                line: None,
                cycle,
                category: "ADD".to_string(),
                code: "ADD009".to_string(),
                description: None,
                history: vec![None, None, Some(0.0), Some(5.0), None],
                current: 0.0,
                new_code: None,
                defect: None,
            }],
        };
        let config = RunConfig::default();
        let run = process_batches(vec![batch], &config).unwrap();
        let report = RunReport::new(run, &config.classifier);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        write_run_json(&path, &report).unwrap();
        let back = read_run_json(&path).unwrap();
        assert_eq!(back, report);

        let id = RecordId {
            cycle,
            category: BillingCategory::LineAddOns,
            code: "ADD009".to_string(),
        };
        let found = back.find(&id).unwrap();
        assert!(found.verdict.is_anomaly);
        assert!(found.record.series.history()[0].is_missing());
    }
}
