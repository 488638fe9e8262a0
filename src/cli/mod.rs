//! Command-line parsing for the billing anomaly engine.
//!
//! Argument parsing and command dispatch stay separate from the engine code;
//! `app::run_config_from_args` turns these structs into a `RunConfig`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::InvalidPolicy;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "billing-anomalies", version, about = "Telecom billing cycle anomaly detection")]
pub struct Cli {
    /// Log debug detail (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Classify one or more cycle snapshot CSVs and print per-cycle reports.
    Run(RunArgs),
    /// Write synthetic cycle snapshot CSVs.
    Generate(GenerateArgs),
    /// Generate synthetic cycles in memory and run them through the engine.
    Demo(DemoArgs),
    /// Show one billing code across cycles.
    History(HistoryArgs),
    /// Analyst notes on anomalies of a saved run.
    #[command(subcommand)]
    Note(NoteCommand),
}

/// Classifier and reporting options shared by every command that classifies.
#[derive(Debug, Args, Clone)]
pub struct EngineArgs {
    /// JSON threshold table overriding the built-in one.
    #[arg(long, value_name = "JSON")]
    pub thresholds: Option<PathBuf>,

    /// Label of the per-category aggregate row [env: BILLING_GRAND_TOTAL_LABEL].
    #[arg(long)]
    pub grand_total_label: Option<String>,

    /// What to do with malformed records.
    #[arg(long, value_enum, default_value_t = InvalidPolicy::Skip)]
    pub on_invalid: InvalidPolicy,

    /// Seed for severity jitter; jitter is off unless set.
    #[arg(long)]
    pub jitter_seed: Option<u64>,

    /// Maximum severity jitter (score units).
    #[arg(long, default_value_t = 0.05, requires = "jitter_seed")]
    pub jitter: f64,

    /// Show top-N anomalies per cycle.
    #[arg(long, default_value_t = 20)]
    pub top: usize,

    /// Export anomalies only (not every record) to --export-csv.
    #[arg(long)]
    pub anomalies_only: bool,

    /// Export per-record verdicts to CSV.
    #[arg(long, value_name = "CSV")]
    pub export_csv: Option<PathBuf>,

    /// Export the full run (records, verdicts, summaries) to JSON.
    #[arg(long, value_name = "JSON")]
    pub export_json: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Cycle snapshot CSV files. Files of the same cycle are merged.
    #[arg(required = true, value_name = "CSV")]
    pub inputs: Vec<PathBuf>,

    #[command(flatten)]
    pub engine: EngineArgs,
}

/// Synthetic data options.
#[derive(Debug, Args, Clone)]
pub struct SampleArgs {
    #[arg(long, default_value_t = 7)]
    pub seed: u64,

    #[arg(long, default_value_t = 2025)]
    pub start_year: i32,

    #[arg(long, default_value_t = 1)]
    pub start_month: u32,

    #[arg(long, default_value_t = 3)]
    pub months: u32,

    #[arg(long, default_value_t = 10)]
    pub cycles_per_month: u32,

    /// Share of codes that are new in their cycle.
    #[arg(long, default_value_t = 0.03)]
    pub new_code_fraction: f64,

    /// Share of codes that bill nothing in their cycle.
    #[arg(long, default_value_t = 0.03)]
    pub drop_fraction: f64,
}

#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// Directory for the generated CSVs (created if missing).
    #[arg(long, value_name = "DIR")]
    pub out_dir: PathBuf,

    #[command(flatten)]
    pub sample: SampleArgs,
}

#[derive(Debug, Args)]
pub struct DemoArgs {
    #[command(flatten)]
    pub sample: SampleArgs,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Billing code to trace.
    #[arg(long)]
    pub code: String,

    #[arg(required = true, value_name = "CSV")]
    pub inputs: Vec<PathBuf>,

    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Debug, Subcommand)]
pub enum NoteCommand {
    /// Attach a note to an anomalous record of a saved run.
    Add(NoteAddArgs),
    /// List notes for one record, or every note.
    List(NoteListArgs),
}

/// Identifies a record inside a run report.
#[derive(Debug, Args, Clone)]
pub struct RecordArgs {
    /// Cycle as MM-C-YYYY (e.g. 03-12-2025).
    #[arg(long)]
    pub cycle: String,

    /// Bill type (SEC, ACR, ADD, SUB or full name).
    #[arg(long)]
    pub category: String,

    #[arg(long)]
    pub code: String,
}

#[derive(Debug, Args)]
pub struct NoteAddArgs {
    /// Run report JSON written by `--export-json`.
    #[arg(long, value_name = "JSON")]
    pub run: PathBuf,

    /// Notebook JSON (created if missing).
    #[arg(long, value_name = "JSON")]
    pub notes: PathBuf,

    #[command(flatten)]
    pub record: RecordArgs,

    #[arg(long)]
    pub author: Option<String>,

    /// Note text.
    pub text: String,
}

#[derive(Debug, Args)]
pub struct NoteListArgs {
    /// Notebook JSON.
    #[arg(long, value_name = "JSON")]
    pub notes: PathBuf,

    #[arg(long, requires_all = ["category", "code"])]
    pub cycle: Option<String>,

    #[arg(long)]
    pub category: Option<String>,

    #[arg(long)]
    pub code: Option<String>,
}
