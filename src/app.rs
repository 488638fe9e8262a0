//! Top-level application orchestration.
//!
//! `src/main.rs` only sets up logging; this module is the "real main" that:
//! - parses CLI arguments
//! - loads snapshots (or generates synthetic ones)
//! - runs the cycle pipeline
//! - prints reports
//! - writes optional exports

use std::path::PathBuf;

use chrono::Utc;
use tracing::{info, warn};

use crate::cli::{
    Cli, Command, DemoArgs, EngineArgs, GenerateArgs, HistoryArgs, NoteAddArgs, NoteCommand, NoteListArgs,
    RunArgs, SampleArgs,
};
use crate::data::{SampleConfig, generate_cycles, write_sample_csv};
use crate::domain::{
    BillingCategory, ClassifierConfig, CycleBatch, CycleId, DEFAULT_GRAND_TOTAL_LABEL, InvalidPolicy, RecordId,
    RunConfig, SeverityJitter,
};
use crate::error::AppError;
use crate::io::{RunReport, load_cycle_csv, read_run_json, write_run_json, write_verdicts_csv};
use crate::notes::NoteBook;
use crate::thresholds::ThresholdTable;

pub mod pipeline;

/// Overrides the grand-total label when `--grand-total-label` is not given.
pub const GRAND_TOTAL_LABEL_ENV: &str = "BILLING_GRAND_TOTAL_LABEL";

/// Dispatch a parsed command line.
pub fn run_cli(cli: Cli) -> Result<(), AppError> {
    match cli.command {
        Command::Run(args) => handle_run(args),
        Command::Generate(args) => handle_generate(args),
        Command::Demo(args) => handle_demo(args),
        Command::History(args) => handle_history(args),
        Command::Note(NoteCommand::Add(args)) => handle_note_add(args),
        Command::Note(NoteCommand::List(args)) => handle_note_list(args),
    }
}

fn handle_run(args: RunArgs) -> Result<(), AppError> {
    let config = run_config_from_args(&args.engine)?;
    let batches = load_batches(&args.inputs, config.on_invalid)?;
    process_and_report(batches, &config)
}

fn handle_demo(args: DemoArgs) -> Result<(), AppError> {
    let config = run_config_from_args(&args.engine)?;
    let sample = sample_config_from_args(&args.sample, &config.classifier.grand_total_label);
    let batches = generate_cycles(&sample)?;
    info!(cycles = batches.len(), seed = sample.seed, "generated demo cycles");
    process_and_report(batches, &config)
}

fn handle_generate(args: GenerateArgs) -> Result<(), AppError> {
    let label = grand_total_label(None);
    let sample = sample_config_from_args(&args.sample, &label);
    let batches = generate_cycles(&sample)?;
    let paths = write_sample_csv(&args.out_dir, &batches)?;
    println!("Wrote {} cycle file(s) to {}", paths.len(), args.out_dir.display());
    Ok(())
}

fn handle_history(args: HistoryArgs) -> Result<(), AppError> {
    let config = run_config_from_args(&args.engine)?;
    let batches = load_batches(&args.inputs, config.on_invalid)?;
    let run = pipeline::process_batches(batches, &config)?;
    let entries = crate::report::code_history(&run.cycles, &args.code);
    print!("{}", crate::report::format_history(args.code.trim(), &entries));
    Ok(())
}

fn handle_note_add(args: NoteAddArgs) -> Result<(), AppError> {
    let report = read_run_json(&args.run)?;
    let id = record_id(&args.record.cycle, &args.record.category, &args.record.code)?;
    let record = report
        .find(&id)
        .ok_or_else(|| AppError::new(2, format!("Record {id} is not in run report '{}'.", args.run.display())))?;

    let mut book = NoteBook::load(&args.notes)?;
    book.add_note(record, args.author, &args.text, Utc::now())
        .map_err(|e| AppError::new(2, e.to_string()))?;
    book.save(&args.notes)?;

    println!("Added note to {id} ({} total).", book.notes_for(&id).len());
    Ok(())
}

fn handle_note_list(args: NoteListArgs) -> Result<(), AppError> {
    let book = NoteBook::load(&args.notes)?;
    match (&args.cycle, &args.category, &args.code) {
        (Some(cycle), Some(category), Some(code)) => {
            let id = record_id(cycle, category, code)?;
            println!("{id}:");
            print!("{}", crate::report::format_notes(book.notes_for(&id)));
        }
        _ => {
            if book.is_empty() {
                println!("No notes.");
            }
            for (id, notes) in book.iter() {
                println!("{id}:");
                print!("{}", crate::report::format_notes(notes));
            }
        }
    }
    Ok(())
}

fn process_and_report(batches: Vec<CycleBatch>, config: &RunConfig) -> Result<(), AppError> {
    let run = pipeline::process_batches(batches, config)?;

    for outcome in &run.cycles {
        println!("{}", crate::report::format_cycle_report(outcome, config.top_n));
    }
    print!("{}", crate::report::format_run_overview(&run));

    if let Some(path) = &config.export_csv {
        let rows = write_verdicts_csv(path, &run, config.anomalies_only)?;
        info!(rows, path = %path.display(), "exported verdicts");
    }
    if let Some(path) = &config.export_json {
        write_run_json(path, &RunReport::new(run.clone(), &config.classifier))?;
        info!(path = %path.display(), "exported run report");
    }

    if run.cycles.is_empty() && !run.failures.is_empty() {
        return Err(AppError::new(4, "Every cycle failed."));
    }
    Ok(())
}

/// Ingest every input file.
///
/// Rows that name their cycle reach validation even when unreadable. Rows
/// that do not are only logged under `Skip`; under `Halt` they abort the run,
/// since no single cycle can be failed for them.
fn load_batches(inputs: &[PathBuf], policy: InvalidPolicy) -> Result<Vec<CycleBatch>, AppError> {
    let mut batches = Vec::new();
    for path in inputs {
        let ingested = load_cycle_csv(path)?;
        for e in &ingested.row_errors {
            warn!(file = %path.display(), line = e.line, code = e.code.as_deref().unwrap_or(""), error = %e.message, "row without a readable cycle");
        }
        if policy == InvalidPolicy::Halt {
            if let Some(e) = ingested.row_errors.first() {
                return Err(AppError::new(
                    2,
                    format!(
                        "{}: line {}: {} ({} row(s) without a readable cycle)",
                        path.display(),
                        e.line,
                        e.message,
                        ingested.row_errors.len()
                    ),
                ));
            }
        }
        info!(
            file = %path.display(),
            rows = ingested.rows_read,
            used = ingested.rows_used,
            defective = ingested.rows_defective,
            cycles = ingested.batches.len(),
            "loaded snapshot"
        );
        batches.extend(ingested.batches);
    }
    Ok(batches)
}

/// Build a `RunConfig` from CLI flags plus `.env` and defaults.
pub fn run_config_from_args(args: &EngineArgs) -> Result<RunConfig, AppError> {
    let thresholds = match &args.thresholds {
        Some(path) => ThresholdTable::from_json_file(path)?,
        None => ThresholdTable::default(),
    };

    let jitter = match args.jitter_seed {
        Some(seed) => {
            if !(args.jitter.is_finite() && (0.0..=1.0).contains(&args.jitter)) {
                return Err(AppError::new(2, "Jitter amplitude must be in [0, 1]."));
            }
            Some(SeverityJitter {
                seed,
                amplitude: args.jitter,
            })
        }
        None => None,
    };

    Ok(RunConfig {
        classifier: ClassifierConfig {
            thresholds,
            grand_total_label: grand_total_label(args.grand_total_label.as_deref()),
            jitter,
        },
        on_invalid: args.on_invalid,
        top_n: args.top,
        anomalies_only: args.anomalies_only,
        export_csv: args.export_csv.clone(),
        export_json: args.export_json.clone(),
    })
}

/// Flag, then `BILLING_GRAND_TOTAL_LABEL` (from the environment or `.env`), then the default.
fn grand_total_label(flag: Option<&str>) -> String {
    if let Some(label) = flag.map(str::trim).filter(|l| !l.is_empty()) {
        return label.to_string();
    }
    dotenvy::dotenv().ok();
    std::env::var(GRAND_TOTAL_LABEL_ENV)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_GRAND_TOTAL_LABEL.to_string())
}

fn sample_config_from_args(args: &SampleArgs, grand_total_label: &str) -> SampleConfig {
    SampleConfig {
        seed: args.seed,
        start_year: args.start_year,
        start_month: args.start_month,
        months: args.months,
        cycles_per_month: args.cycles_per_month,
        new_code_fraction: args.new_code_fraction,
        drop_fraction: args.drop_fraction,
        grand_total_label: grand_total_label.to_string(),
        ..SampleConfig::default()
    }
}

fn record_id(cycle: &str, category: &str, code: &str) -> Result<RecordId, AppError> {
    let cycle: CycleId = cycle.parse().map_err(|e: String| AppError::new(2, e))?;
    let category: BillingCategory = category.parse().map_err(|e: String| AppError::new(2, e))?;
    Ok(RecordId {
        cycle,
        category,
        code: code.trim().to_string(),
    })
}
