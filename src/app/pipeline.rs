//! Shared processing pipeline used by every CLI command.
//!
//! Per cycle: validate -> metrics + classify (parallel) -> barrier -> summarize.
//!
//! Cycles are independent and are processed in parallel. A cycle either
//! produces its full set of verdicts plus a summary, or nothing at all.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::aggregate::{CycleBreakdown, breakdown, summarize};
use crate::classify::classify_record;
use crate::domain::{
    BillingRecord, ClassifiedRecord, CycleBatch, CycleId, CycleSummary, InvalidPolicy, RawRecord, RecordRejection,
    RunConfig, validate_record,
};
use crate::error::EngineError;

/// All outputs of one processed cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleOutcome {
    pub cycle: CycleId,
    pub records: Vec<ClassifiedRecord>,
    pub rejections: Vec<RecordRejection>,
    pub summary: CycleSummary,
    pub breakdown: CycleBreakdown,
}

impl CycleOutcome {
    pub fn anomalies(&self) -> impl Iterator<Item = &ClassifiedRecord> {
        self.records.iter().filter(|r| r.verdict.is_anomaly)
    }
}

/// A cycle that produced no summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleFailure {
    pub cycle: CycleId,
    pub error: String,
}

/// All computed outputs of a run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunOutput {
    /// Successfully processed cycles, oldest first.
    pub cycles: Vec<CycleOutcome>,
    pub failures: Vec<CycleFailure>,
}

impl RunOutput {
    pub fn cycle(&self, cycle: CycleId) -> Option<&CycleOutcome> {
        self.cycles.iter().find(|c| c.cycle == cycle)
    }

    pub fn rejection_count(&self) -> usize {
        self.cycles.iter().map(|c| c.rejections.len()).sum()
    }
}

/// Merge batches that share a cycle (e.g. one file per category), ordered by cycle.
pub fn merge_batches(batches: Vec<CycleBatch>) -> Vec<CycleBatch> {
    let mut merged: BTreeMap<CycleId, Vec<RawRecord>> = BTreeMap::new();
    for batch in batches {
        merged.entry(batch.cycle).or_default().extend(batch.records);
    }
    merged
        .into_iter()
        .map(|(cycle, records)| CycleBatch { cycle, records })
        .collect()
}

/// Process one cycle.
///
/// Errors:
/// - `Validation` when `on_invalid = halt` and a record is malformed
/// - `Configuration` when the threshold table lacks a category
/// - `Aggregation` when the verdict set does not cover the accepted records
pub fn process_cycle(batch: &CycleBatch, config: &RunConfig) -> Result<CycleOutcome, EngineError> {
    let cycle = batch.cycle;
    info!(%cycle, rows = batch.records.len(), "processing cycle");

    let (accepted, rejections) = validate_batch(batch, config.on_invalid)?;

    let expected = accepted.len();
    let records: Vec<ClassifiedRecord> = accepted
        .into_par_iter()
        .map(|record| classify_record(record, &config.classifier))
        .collect::<Result<_, _>>()?;

    for r in records.iter().filter(|r| r.verdict.is_anomaly) {
        debug!(
            %cycle,
            code = %r.record.code,
            category = r.record.category.tag(),
            rule = r.verdict.rule.map(|x| x.label()).unwrap_or_default(),
            score = r.verdict.score.unwrap_or_default(),
            "anomaly"
        );
    }

    // Barrier: every accepted record has a verdict before the summary runs.
    let summary = summarize(cycle, expected, &records)?;
    let breakdown = breakdown(&records, &config.classifier.grand_total_label);

    info!(
        %cycle,
        records = summary.record_count,
        anomalies = summary.anomaly_count,
        rejected = rejections.len(),
        "cycle processed"
    );

    Ok(CycleOutcome {
        cycle,
        records,
        rejections,
        summary,
        breakdown,
    })
}

fn validate_batch(
    batch: &CycleBatch,
    policy: InvalidPolicy,
) -> Result<(Vec<BillingRecord>, Vec<RecordRejection>), EngineError> {
    let results: Vec<(&RawRecord, Result<BillingRecord, EngineError>)> = batch
        .records
        .par_iter()
        .map(|raw| {
            let checked = if raw.cycle == batch.cycle {
                validate_record(raw)
            } else {
                Err(EngineError::validation(
                    batch.cycle,
                    raw.code.clone(),
                    format!("row belongs to cycle {}", raw.cycle),
                ))
            };
            (raw, checked)
        })
        .collect();

    let mut accepted = Vec::with_capacity(results.len());
    let mut rejections = Vec::new();

    for (raw, result) in results {
        match result {
            Ok(record) => accepted.push(record),
            Err(err) => {
                if policy == InvalidPolicy::Halt {
                    error!(cycle = %batch.cycle, code = %raw.code, line = ?raw.line, error = %err, "halting cycle");
                    return Err(err);
                }
                let reason = match &err {
                    EngineError::Validation { reason, .. } => reason.clone(),
                    other => other.to_string(),
                };
                warn!(cycle = %batch.cycle, code = %raw.code, line = ?raw.line, %reason, "record rejected");
                rejections.push(RecordRejection {
                    cycle: batch.cycle,
                    code: raw.code.clone(),
                    line: raw.line,
                    reason,
                });
            }
        }
    }

    Ok((accepted, rejections))
}

/// Process many cycles in parallel.
///
/// A configuration error aborts the whole run. Validation (halt policy) and
/// aggregation errors only drop the affected cycle, which is reported in
/// `RunOutput::failures`.
pub fn process_batches(batches: Vec<CycleBatch>, config: &RunConfig) -> Result<RunOutput, EngineError> {
    let batches = merge_batches(batches);

    let results: Vec<(CycleId, Result<CycleOutcome, EngineError>)> = batches
        .par_iter()
        .map(|batch| (batch.cycle, process_cycle(batch, config)))
        .collect();

    let mut output = RunOutput::default();
    for (cycle, result) in results {
        match result {
            Ok(outcome) => output.cycles.push(outcome),
            Err(err @ EngineError::Configuration(_)) => {
                error!(%cycle, error = %err, "aborting run");
                return Err(err);
            }
            Err(err) => {
                error!(%cycle, error = %err, "cycle failed");
                output.failures.push(CycleFailure {
                    cycle,
                    error: err.to_string(),
                });
            }
        }
    }

    Ok(output)
}
