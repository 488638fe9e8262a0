//! Shared domain types.
//!
//! These types are kept lightweight and serializable so they can be:
//!
//! - used in-memory during classification
//! - exported to JSON/CSV
//! - reloaded later for notes and history queries

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::thresholds::ThresholdTable;

/// Number of historical slots preceding the current amount.
pub const HISTORY_LEN: usize = 5;

/// Reserved billing code of the per-sheet aggregate row.
pub const DEFAULT_GRAND_TOTAL_LABEL: &str = "Grand Total";

/// The four fixed billing classifications ("audit types").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCategory {
    SingleEventCharges,
    AccountCorrections,
    LineAddOns,
    SubscriptionPlans,
}

impl BillingCategory {
    pub const ALL: [BillingCategory; 4] = [
        BillingCategory::SingleEventCharges,
        BillingCategory::AccountCorrections,
        BillingCategory::LineAddOns,
        BillingCategory::SubscriptionPlans,
    ];

    /// Human-readable label for terminal output.
    pub fn display_name(self) -> &'static str {
        match self {
            BillingCategory::SingleEventCharges => "Single Event Charges",
            BillingCategory::AccountCorrections => "Account Corrections",
            BillingCategory::LineAddOns => "Line Add-ons",
            BillingCategory::SubscriptionPlans => "Subscription Plans",
        }
    }

    /// Short bill-type tag used in snapshot files and code prefixes.
    pub fn tag(self) -> &'static str {
        match self {
            BillingCategory::SingleEventCharges => "SEC",
            BillingCategory::AccountCorrections => "ACR",
            BillingCategory::LineAddOns => "ADD",
            BillingCategory::SubscriptionPlans => "SUB",
        }
    }

    /// Resolve a tag or display name (case-insensitive).
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL.into_iter().find(|c| {
            c.tag().eq_ignore_ascii_case(label)
                || c.display_name().eq_ignore_ascii_case(label)
                || serde_name(*c).eq_ignore_ascii_case(label)
        })
    }
}

fn serde_name(category: BillingCategory) -> &'static str {
    match category {
        BillingCategory::SingleEventCharges => "single_event_charges",
        BillingCategory::AccountCorrections => "account_corrections",
        BillingCategory::LineAddOns => "line_add_ons",
        BillingCategory::SubscriptionPlans => "subscription_plans",
    }
}

impl fmt::Display for BillingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for BillingCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_label(s).ok_or_else(|| format!("unknown billing category `{s}`"))
    }
}

/// One discrete billing-processing run: `MM-C-YYYY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CycleId {
    pub year: i32,
    pub month: u32,
    pub number: u32,
}

impl CycleId {
    pub fn new(year: i32, month: u32, number: u32) -> Result<Self, String> {
        if !(1..=12).contains(&month) {
            return Err(format!("month must be in 1..=12 (got {month})"));
        }
        if number == 0 {
            return Err("bill cycle number must be >= 1".to_string());
        }
        if NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(format!("year {year} is out of range"));
        }
        Ok(Self { year, month, number })
    }

    /// First day of the billing month.
    pub fn period_start(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }
}

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}-{}-{}", self.month, self.number, self.year)
    }
}

impl FromStr for CycleId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('-').collect();
        let [month, number, year] = parts.as_slice() else {
            return Err(format!("expected cycle as MM-C-YYYY, got `{s}`"));
        };
        let month = month.parse::<u32>().map_err(|e| format!("invalid month in `{s}`: {e}"))?;
        let number = number.parse::<u32>().map_err(|e| format!("invalid cycle number in `{s}`: {e}"))?;
        let year = year.parse::<i32>().map_err(|e| format!("invalid year in `{s}`: {e}"))?;
        CycleId::new(year, month, number)
    }
}

/// One historical slot: either the code did not exist yet, or it billed an amount
/// (which may be zero).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "Option<f64>", into = "Option<f64>")]
pub enum HistorySlot {
    Missing,
    Amount(f64),
}

impl HistorySlot {
    pub fn amount(self) -> Option<f64> {
        match self {
            HistorySlot::Missing => None,
            HistorySlot::Amount(v) => Some(v),
        }
    }

    pub fn is_missing(self) -> bool {
        matches!(self, HistorySlot::Missing)
    }
}

impl From<Option<f64>> for HistorySlot {
    fn from(value: Option<f64>) -> Self {
        value.map_or(HistorySlot::Missing, HistorySlot::Amount)
    }
}

impl From<HistorySlot> for Option<f64> {
    fn from(value: HistorySlot) -> Self {
        value.amount()
    }
}

/// Five historical amounts (oldest first) plus the current amount.
///
/// Construct through [`AmountSeries::new`], which enforces non-negative,
/// finite values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmountSeries {
    history: [HistorySlot; HISTORY_LEN],
    current: f64,
}

impl AmountSeries {
    pub fn new(history: [HistorySlot; HISTORY_LEN], current: f64) -> Result<Self, String> {
        for (idx, slot) in history.iter().enumerate() {
            if let HistorySlot::Amount(v) = slot {
                check_amount(*v).map_err(|e| format!("{} months ago: {e}", HISTORY_LEN - idx))?;
            }
        }
        check_amount(current).map_err(|e| format!("active month: {e}"))?;
        Ok(Self { history, current })
    }

    pub fn history(&self) -> &[HistorySlot; HISTORY_LEN] {
        &self.history
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    /// The slot immediately preceding the current cycle.
    pub fn most_recent(&self) -> HistorySlot {
        self.history[HISTORY_LEN - 1]
    }

    /// Historical amounts that exist, oldest first.
    pub fn present_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.history.iter().filter_map(|s| s.amount())
    }

    pub fn all_missing(&self) -> bool {
        self.history.iter().all(|s| s.is_missing())
    }

    pub fn any_positive(&self) -> bool {
        self.present_values().any(|v| v > 0.0)
    }
}

fn check_amount(v: f64) -> Result<(), String> {
    if !v.is_finite() {
        return Err("amount is not finite".to_string());
    }
    if v < 0.0 {
        return Err(format!("negative amount {v}"));
    }
    Ok(())
}

/// Trend features derived from an [`AmountSeries`].
///
/// Percent fields are fractions (`0.25` = 25%) and are `None` when the
/// denominator is zero; they are never reported as `0.0` in that case.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ComputedMetrics {
    pub rolling_average: Option<f64>,
    pub mom_delta: Option<f64>,
    pub mom_percent: Option<f64>,
    pub avg_delta: Option<f64>,
    pub avg_percent: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyDirection {
    Spike,
    Drop,
}

impl AnomalyDirection {
    pub fn label(self) -> &'static str {
        match self {
            AnomalyDirection::Spike => "spike",
            AnomalyDirection::Drop => "drop",
        }
    }
}

/// Qualitative severity bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [Severity::Low, Severity::Medium, Severity::High, Severity::Critical];

    /// Bucket a score in `[0, 1]`: quartiles, upper bound exclusive.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.75 {
            Severity::Critical
        } else if score >= 0.5 {
            Severity::High
        } else if score >= 0.25 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Which classifier rule flagged a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyRule {
    NewCode,
    DropToZero,
    GrandTotal,
    ThresholdBreach,
}

impl AnomalyRule {
    pub fn label(self) -> &'static str {
        match self {
            AnomalyRule::NewCode => "new_code",
            AnomalyRule::DropToZero => "drop_to_zero",
            AnomalyRule::GrandTotal => "grand_total",
            AnomalyRule::ThresholdBreach => "threshold_breach",
        }
    }
}

/// The classifier's decision for one (code, cycle) record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyVerdict {
    pub is_anomaly: bool,
    pub score: Option<f64>,
    pub severity: Option<Severity>,
    pub reason: Option<String>,
    pub direction: Option<AnomalyDirection>,
    pub rule: Option<AnomalyRule>,
}

impl AnomalyVerdict {
    pub fn normal() -> Self {
        Self {
            is_anomaly: false,
            score: None,
            severity: None,
            reason: None,
            direction: None,
            rule: None,
        }
    }

    pub fn flagged(
        rule: AnomalyRule,
        direction: Option<AnomalyDirection>,
        score: f64,
        reason: impl Into<String>,
    ) -> Self {
        let score = score.clamp(0.0, 1.0);
        Self {
            is_anomaly: true,
            score: Some(score),
            severity: Some(Severity::from_score(score)),
            reason: Some(reason.into()),
            direction,
            rule: Some(rule),
        }
    }
}

/// Identity of a record within a run; notes are keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId {
    pub cycle: CycleId,
    pub category: BillingCategory,
    pub code: String,
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.cycle, self.category.tag(), self.code)
    }
}

/// A snapshot row as supplied by the input provider, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Source line (1-based) when the row came from a file.
    pub line: Option<usize>,
    pub cycle: CycleId,
    pub category: String,
    pub code: String,
    pub description: Option<String>,
    /// Historical amounts, oldest first; `None` marks a missing slot.
    pub history: Vec<Option<f64>>,
    pub current: f64,
    /// Explicit new-code flag, when the provider knows it.
    pub new_code: Option<bool>,
    /// Set when the source row names its cycle but its values could not be
    /// read. Validation always rejects such a record.
    pub defect: Option<String>,
}

/// A validated billing record ready for classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingRecord {
    pub cycle: CycleId,
    pub category: BillingCategory,
    pub code: String,
    pub description: Option<String>,
    pub series: AmountSeries,
}

impl BillingRecord {
    pub fn id(&self) -> RecordId {
        RecordId {
            cycle: self.cycle,
            category: self.category,
            code: self.code.clone(),
        }
    }
}

/// A record with its derived metrics and verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedRecord {
    pub record: BillingRecord,
    pub metrics: ComputedMetrics,
    pub verdict: AnomalyVerdict,
}

/// All raw rows of one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleBatch {
    pub cycle: CycleId,
    pub records: Vec<RawRecord>,
}

/// Cycle-level totals. Always computed over the full record set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub cycle: CycleId,
    pub record_count: usize,
    pub anomaly_count: usize,
    pub total_amount: f64,
}

/// A record that failed validation, with enough context to locate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordRejection {
    pub cycle: CycleId,
    pub code: String,
    pub line: Option<usize>,
    pub reason: String,
}

/// What to do when a record fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InvalidPolicy {
    /// Report the record and continue with the rest of the cycle.
    Skip,
    /// Abort the cycle on the first invalid record.
    Halt,
}

/// Opt-in, reproducible severity perturbation.
///
/// The offset applied to a record's score is derived from `seed` and the record
/// identity, so identical runs always produce identical scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityJitter {
    pub seed: u64,
    /// Maximum absolute offset added to the score.
    pub amplitude: f64,
}

/// Classifier settings shared by every record of a run.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub thresholds: ThresholdTable,
    pub grand_total_label: String,
    pub jitter: Option<SeverityJitter>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            thresholds: ThresholdTable::default(),
            grand_total_label: DEFAULT_GRAND_TOTAL_LABEL.to_string(),
            jitter: None,
        }
    }
}

/// A full run's configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus `.env` and defaults).
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub classifier: ClassifierConfig,
    pub on_invalid: InvalidPolicy,

    pub top_n: usize,
    pub anomalies_only: bool,

    pub export_csv: Option<PathBuf>,
    pub export_json: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierConfig::default(),
            on_invalid: InvalidPolicy::Skip,
            top_n: 20,
            anomalies_only: false,
            export_csv: None,
            export_json: None,
        }
    }
}
