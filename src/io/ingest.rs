//! CSV ingest of billing snapshots.
//!
//! Turns a snapshot CSV (one row per billing code per cycle) into raw records
//! grouped by cycle. This module only parses; semantic checks (negative
//! amounts, unknown categories, new-code consistency) happen in
//! `domain::validate` so that every rejection carries the same context.
//!
//! Design goals:
//! - **Strict schema** for required columns (clear errors + exit code 2)
//! - **Row-level errors**: a row whose cycle can be read but whose values
//!   cannot is still emitted, marked defective, so validation rejects it
//!   under the cycle's invalid-record policy. Only rows with no readable
//!   cycle are reported here as [`RowError`]s.
//! - **Explicit missing slots**: an empty historical cell means "did not exist";
//!   `0` means "billed zero". Any other non-numeric text is an error.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;

use crate::domain::{CycleBatch, CycleId, HISTORY_LEN, RawRecord};
use crate::error::AppError;

/// A row whose cycle could not be determined.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub line: usize,
    pub code: Option<String>,
    pub message: String,
}

/// Ingest output: raw records per cycle + row errors.
#[derive(Debug, Clone)]
pub struct IngestedBatch {
    pub batches: Vec<CycleBatch>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
    /// Rows handed on as records, defective ones included.
    pub rows_used: usize,
    pub rows_defective: usize,
}

const YEAR: &[&str] = &["year"];
const MONTH: &[&str] = &["month"];
const CYCLE: &[&str] = &["bill_cycle", "bill_cycle_number", "cycle"];
const BILL_TYPE: &[&str] = &["bill_type", "category"];
const CODE: &[&str] = &["billing_code", "code"];
const DESCRIPTION: &[&str] = &["description", "billing_code_description"];
const CURRENT: &[&str] = &["active_month", "current"];
const NEW_CODE: &[&str] = &["new_code", "is_new"];

/// Column aliases for the slot `months_ago` cycles before the current one.
fn history_aliases(months_ago: usize) -> [String; 4] {
    [
        format!("amount_{months_ago}_months_ago"),
        format!("amount_{months_ago}_month_ago"),
        format!("{months_ago}_months_ago"),
        format!("{months_ago}_month_ago"),
    ]
}

/// Resolved column positions.
struct Columns {
    year: usize,
    month: usize,
    cycle: usize,
    bill_type: usize,
    code: usize,
    description: Option<usize>,
    /// Oldest first.
    history: [usize; HISTORY_LEN],
    current: usize,
    new_code: Option<usize>,
}

/// Load a snapshot CSV from disk.
pub fn load_cycle_csv(path: &Path) -> Result<IngestedBatch, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open CSV '{}': {e}", path.display())))?;
    read_cycle_csv(file).map_err(|e| AppError::new(e.exit_code(), format!("{}: {e}", path.display())))
}

/// Parse a snapshot CSV from any reader.
pub fn read_cycle_csv<R: Read>(reader: R) -> Result<IngestedBatch, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read CSV headers: {e}")))?
        .clone();

    let header_map = build_header_map(&headers);
    let columns = resolve_columns(&header_map)?;

    let mut grouped: BTreeMap<CycleId, Vec<RawRecord>> = BTreeMap::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;
    let mut rows_defective = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // +2: records() starts after the header, and lines are 1-based.
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    code: None,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        let cycle = match parse_cycle(&record, &columns) {
            Ok(cycle) => cycle,
            Err(message) => {
                row_errors.push(RowError {
                    line,
                    code: get(&record, Some(columns.code)).map(str::to_string),
                    message,
                });
                continue;
            }
        };

        let raw = parse_row(&record, &columns, line, cycle).unwrap_or_else(|message| {
            rows_defective += 1;
            defective_row(&record, &columns, line, cycle, message)
        });
        grouped.entry(cycle).or_default().push(raw);
    }

    let rows_used = grouped.values().map(Vec::len).sum();
    if rows_used == 0 {
        return Err(AppError::new(3, "No parseable billing rows in CSV."));
    }

    let batches = grouped
        .into_iter()
        .map(|(cycle, records)| CycleBatch { cycle, records })
        .collect();

    Ok(IngestedBatch {
        batches,
        row_errors,
        rows_read,
        rows_used,
        rows_defective,
    })
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports often prefix the first header with a UTF-8 BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase().replace([' ', '-'], "_")
}

fn find<S: AsRef<str>>(header_map: &HashMap<String, usize>, aliases: &[S]) -> Option<usize> {
    aliases.iter().find_map(|a| header_map.get(a.as_ref()).copied())
}

fn require<S: AsRef<str>>(header_map: &HashMap<String, usize>, aliases: &[S]) -> Result<usize, AppError> {
    find(header_map, aliases).ok_or_else(|| {
        AppError::new(
            2,
            format!("Missing required column: `{}`", aliases.first().map_or("", |a| a.as_ref())),
        )
    })
}

fn resolve_columns(header_map: &HashMap<String, usize>) -> Result<Columns, AppError> {
    let mut history = [0usize; HISTORY_LEN];
    for (slot, months_ago) in history.iter_mut().zip((1..=HISTORY_LEN).rev()) {
        *slot = require(header_map, &history_aliases(months_ago))?;
    }

    Ok(Columns {
        year: require(header_map, YEAR)?,
        month: require(header_map, MONTH)?,
        cycle: require(header_map, CYCLE)?,
        bill_type: require(header_map, BILL_TYPE)?,
        code: require(header_map, CODE)?,
        description: find(header_map, DESCRIPTION),
        history,
        current: require(header_map, CURRENT)?,
        new_code: find(header_map, NEW_CODE),
    })
}

fn parse_cycle(record: &StringRecord, columns: &Columns) -> Result<CycleId, String> {
    let year: i32 = parse_required(record, columns.year, "year")?;
    let month: u32 = parse_required(record, columns.month, "month")?;
    let number: u32 = parse_required(record, columns.cycle, "bill_cycle")?;
    CycleId::new(year, month, number)
}

fn parse_row(record: &StringRecord, columns: &Columns, line: usize, cycle: CycleId) -> Result<RawRecord, String> {
    let code = get(record, Some(columns.code))
        .ok_or_else(|| "Missing `billing_code` value.".to_string())?
        .to_string();
    let category = get(record, Some(columns.bill_type))
        .ok_or_else(|| "Missing `bill_type` value.".to_string())?
        .to_string();

    let mut history = Vec::with_capacity(HISTORY_LEN);
    for (idx, col) in columns.history.iter().enumerate() {
        let months_ago = HISTORY_LEN - idx;
        history.push(parse_amount(get(record, Some(*col))).map_err(|e| format!("{months_ago} months ago: {e}"))?);
    }

    let current = parse_amount(get(record, Some(columns.current)))
        .map_err(|e| format!("active month: {e}"))?
        .ok_or_else(|| "Missing active month amount.".to_string())?;

    let new_code = match get(record, columns.new_code) {
        Some(s) => Some(parse_flag(s)?),
        None => None,
    };

    Ok(RawRecord {
        line: Some(line),
        cycle,
        category,
        code,
        description: get(record, columns.description).map(str::to_string),
        history,
        current,
        new_code,
        defect: None,
    })
}

/// Placeholder for a row with a known cycle but unreadable values.
fn defective_row(record: &StringRecord, columns: &Columns, line: usize, cycle: CycleId, message: String) -> RawRecord {
    let cell = |col| get(record, Some(col)).unwrap_or_default().to_string();
    RawRecord {
        line: Some(line),
        cycle,
        category: cell(columns.bill_type),
        code: cell(columns.code),
        description: get(record, columns.description).map(str::to_string),
        history: Vec::new(),
        current: 0.0,
        new_code: None,
        defect: Some(message),
    }
}

/// Non-empty cell value.
fn get(record: &StringRecord, col: Option<usize>) -> Option<&str> {
    col.and_then(|c| record.get(c)).map(str::trim).filter(|s| !s.is_empty())
}

fn parse_required<T: std::str::FromStr>(record: &StringRecord, col: usize, name: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    let raw = get(record, Some(col)).ok_or_else(|| format!("Missing `{name}` value."))?;
    raw.parse::<T>().map_err(|e| format!("Invalid `{name}` value `{raw}`: {e}"))
}

/// Empty -> missing slot; otherwise the cell must be a number.
fn parse_amount(cell: Option<&str>) -> Result<Option<f64>, String> {
    let Some(raw) = cell else {
        return Ok(None);
    };
    let v = raw
        .parse::<f64>()
        .map_err(|_| format!("ambiguous amount `{raw}` (leave the cell empty for a missing month)"))?;
    if !v.is_finite() {
        return Err(format!("ambiguous amount `{raw}` (leave the cell empty for a missing month)"));
    }
    Ok(Some(v))
}

fn parse_flag(raw: &str) -> Result<bool, String> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(format!("Invalid `new_code` flag `{raw}`.")),
    }
}
