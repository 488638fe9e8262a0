//! Synthetic billing cycle generation.
//!
//! Produces cycle snapshots shaped like real provider exports: per category a
//! few hundred codes with an upward monthly trend, Gaussian noise, a handful of
//! brand-new codes, a handful of codes that stopped billing, and one grand-total
//! row summing the category.

use std::fs;
use std::path::{Path, PathBuf};

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use tracing::info;

use crate::domain::{
    BillingCategory, CycleBatch, CycleId, DEFAULT_GRAND_TOTAL_LABEL, HISTORY_LEN, RawRecord, SeedMixer,
};
use crate::error::AppError;
use crate::io::export::write_snapshot_csv;

/// Amounts are clipped to this ceiling.
pub const AMOUNT_CAP: f64 = 18_000_000.0;

const BASE_MIN: f64 = 1_000_000.0;
const BASE_MAX: f64 = 17_000_000.0;
const MONTH_STEP: f64 = 100_000.0;
const HISTORY_NOISE_SD: f64 = 200_000.0;
const CURRENT_NOISE_SD: f64 = 1_000_000.0;
const MAX_CYCLE_NUMBER: u32 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct SampleConfig {
    pub seed: u64,
    pub start_year: i32,
    pub start_month: u32,
    pub months: u32,
    pub cycles_per_month: u32,
    pub min_codes: usize,
    pub max_codes: usize,
    /// Share of codes per category that appear for the first time.
    pub new_code_fraction: f64,
    /// Share of codes per category that bill nothing this cycle.
    pub drop_fraction: f64,
    pub grand_total_label: String,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            seed: 7,
            start_year: 2025,
            start_month: 1,
            months: 3,
            cycles_per_month: 10,
            min_codes: 100,
            max_codes: 200,
            new_code_fraction: 0.03,
            drop_fraction: 0.03,
            grand_total_label: DEFAULT_GRAND_TOTAL_LABEL.to_string(),
        }
    }
}

impl SampleConfig {
    fn validate(&self) -> Result<(), AppError> {
        if self.months == 0 || self.cycles_per_month == 0 {
            return Err(AppError::new(2, "Months and cycles per month must be > 0."));
        }
        if self.cycles_per_month > MAX_CYCLE_NUMBER {
            return Err(AppError::new(
                2,
                format!("At most {MAX_CYCLE_NUMBER} cycles per month are supported."),
            ));
        }
        if !(1..=12).contains(&self.start_month) {
            return Err(AppError::new(2, format!("Invalid start month {}.", self.start_month)));
        }
        if self.min_codes == 0 || self.max_codes < self.min_codes {
            return Err(AppError::new(2, "Invalid code count range."));
        }
        let fractions_ok = (0.0..=1.0).contains(&self.new_code_fraction)
            && (0.0..=1.0).contains(&self.drop_fraction)
            && self.new_code_fraction + self.drop_fraction <= 1.0;
        if !fractions_ok {
            return Err(AppError::new(2, "New-code and drop fractions must be in [0, 1] and sum to <= 1."));
        }
        if self.grand_total_label.trim().is_empty() {
            return Err(AppError::new(2, "Grand total label must not be empty."));
        }
        Ok(())
    }
}

/// Generate `months * cycles_per_month` cycles, oldest first.
///
/// The same config always yields the same batches.
pub fn generate_cycles(config: &SampleConfig) -> Result<Vec<CycleBatch>, AppError> {
    config.validate()?;

    let mut rng = StdRng::seed_from_u64(sample_seed(config));
    let normal = Normal::new(0.0, 1.0).map_err(|e| AppError::new(4, format!("Noise distribution error: {e}")))?;

    let mut batches = Vec::with_capacity((config.months * config.cycles_per_month) as usize);
    for offset in 0..config.months {
        let (year, month) = month_at(config.start_year, config.start_month, offset);

        let mut numbers: Vec<u32> = rand::seq::index::sample(&mut rng, MAX_CYCLE_NUMBER as usize, config.cycles_per_month as usize)
            .into_iter()
            .map(|i| i as u32 + 1)
            .collect();
        numbers.sort_unstable();

        for number in numbers {
            let cycle = CycleId::new(year, month, number).map_err(|e| AppError::new(4, e))?;
            let mut records = Vec::new();
            for category in BillingCategory::ALL {
                records.extend(category_rows(&mut rng, &normal, config, cycle, category, offset));
            }
            batches.push(CycleBatch { cycle, records });
        }
    }

    Ok(batches)
}

/// Write each batch as `billing_cycle_<MM-C-YYYY>.csv` under `out_dir`.
pub fn write_sample_csv(out_dir: &Path, batches: &[CycleBatch]) -> Result<Vec<PathBuf>, AppError> {
    fs::create_dir_all(out_dir)
        .map_err(|e| AppError::new(2, format!("Failed to create output dir '{}': {e}", out_dir.display())))?;

    let mut written = Vec::with_capacity(batches.len());
    for batch in batches {
        let path = out_dir.join(format!("billing_cycle_{}.csv", batch.cycle));
        write_snapshot_csv(&path, batch)?;
        info!(cycle = %batch.cycle, rows = batch.records.len(), path = %path.display(), "wrote sample cycle");
        written.push(path);
    }
    Ok(written)
}

fn category_rows(
    rng: &mut StdRng,
    normal: &Normal<f64>,
    config: &SampleConfig,
    cycle: CycleId,
    category: BillingCategory,
    month_offset: u32,
) -> Vec<RawRecord> {
    let n = rng.gen_range(config.min_codes..=config.max_codes);
    let n_new = (n as f64 * config.new_code_fraction).round() as usize;
    let n_drop = ((n as f64 * config.drop_fraction).round() as usize).min(n - n_new);

    // First `n_new` picks become new codes, the next `n_drop` stop billing.
    let picks = rand::seq::index::sample(rng, n, n_new + n_drop).into_vec();
    let new_codes = &picks[..n_new];
    let dropped = &picks[n_new..];

    let offset = f64::from(month_offset);
    let mut rows = Vec::with_capacity(n + 1);
    let mut history_totals = [0.0; HISTORY_LEN];
    let mut current_total = 0.0;

    for i in 0..n {
        let base = rng.gen_range(BASE_MIN..BASE_MAX) + offset * MONTH_STEP;

        let mut history = [0.0; HISTORY_LEN];
        for (slot, value) in history.iter_mut().enumerate() {
            // Oldest slot carries the smallest trend.
            let trend = (offset + 1.0 + slot as f64) * rng.gen_range(50_000.0..300_000.0);
            *value = clip_amount(base + trend + HISTORY_NOISE_SD * normal.sample(rng));
        }
        let trend = (offset + 5.0) * rng.gen_range(100_000.0..500_000.0);
        let mut current = clip_amount(base + trend + CURRENT_NOISE_SD * normal.sample(rng));

        let (history, new_code) = if new_codes.contains(&i) {
            (vec![None; HISTORY_LEN], Some(true))
        } else {
            if dropped.contains(&i) {
                current = 0.0;
            }
            for (total, v) in history_totals.iter_mut().zip(history) {
                *total += v;
            }
            (history.iter().copied().map(Some).collect(), None)
        };
        current_total += current;

        rows.push(RawRecord {
            line: None,
            cycle,
            category: category.tag().to_string(),
            code: format!("{}{:03}", category.tag(), i + 1),
            description: None,
            history,
            current,
            new_code,
            defect: None,
        });
    }

    rows.push(RawRecord {
        line: None,
        cycle,
        category: category.tag().to_string(),
        code: config.grand_total_label.clone(),
        description: Some(format!("{} total", category.display_name())),
        history: history_totals.iter().map(|v| Some(round_cents(*v))).collect(),
        current: round_cents(current_total),
        new_code: None,
        defect: None,
    });

    rows
}

fn month_at(start_year: i32, start_month: u32, offset: u32) -> (i32, u32) {
    let index = start_month - 1 + offset;
    (start_year + (index / 12) as i32, index % 12 + 1)
}

fn clip_amount(value: f64) -> f64 {
    round_cents(value.clamp(0.0, AMOUNT_CAP))
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn sample_seed(config: &SampleConfig) -> u64 {
    SeedMixer::new()
        .u64(config.seed)
        .i32(config.start_year)
        .u32(config.start_month)
        .u32(config.months)
        .u32(config.cycles_per_month)
        .u64(config.min_codes as u64)
        .u64(config.max_codes as u64)
        .f64(config.new_code_fraction)
        .f64(config.drop_fraction)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::pipeline::process_batches;
    use crate::domain::{AnomalyRule, RunConfig};
    use crate::io::ingest::load_cycle_csv;

    fn small() -> SampleConfig {
        SampleConfig {
            months: 2,
            cycles_per_month: 3,
            min_codes: 100,
            max_codes: 120,
            new_code_fraction: 0.05,
            drop_fraction: 0.05,
            ..SampleConfig::default()
        }
    }

    #[test]
    fn generation_is_reproducible() {
        let a = generate_cycles(&small()).unwrap();
        let b = generate_cycles(&small()).unwrap();
        assert_eq!(a, b);

        let c = generate_cycles(&SampleConfig { seed: 99, ..small() }).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn cycles_are_ordered_and_shaped() {
        let batches = generate_cycles(&small()).unwrap();
        assert_eq!(batches.len(), 6);
        assert!(batches.windows(2).all(|w| w[0].cycle < w[1].cycle));
        assert!(batches[..3].iter().all(|b| b.cycle.month == 1 && b.cycle.year == 2025));
        assert!(batches[3..].iter().all(|b| b.cycle.month == 2));

        for batch in &batches {
            assert!((1..=30).contains(&batch.cycle.number));
            for category in BillingCategory::ALL {
                let rows: Vec<_> = batch.records.iter().filter(|r| r.category == category.tag()).collect();
                // Codes plus one grand-total row.
                assert!((101..=121).contains(&rows.len()));
                assert_eq!(rows.iter().filter(|r| r.code == DEFAULT_GRAND_TOTAL_LABEL).count(), 1);
            }
            for r in batch.records.iter().filter(|r| r.code != DEFAULT_GRAND_TOTAL_LABEL) {
                assert_eq!(r.history.len(), HISTORY_LEN);
                assert!((0.0..=AMOUNT_CAP).contains(&r.current));
            }
        }
    }

    #[test]
    fn months_roll_over_the_year() {
        assert_eq!(month_at(2025, 11, 0), (2025, 11));
        assert_eq!(month_at(2025, 11, 2), (2026, 1));
        assert_eq!(month_at(2025, 1, 12), (2026, 1));
    }

    #[test]
    fn generated_cycles_classify_cleanly() {
        let batches = generate_cycles(&small()).unwrap();
        let run = process_batches(batches, &RunConfig::default()).unwrap();
        assert!(run.failures.is_empty());
        assert_eq!(run.rejection_count(), 0);

        let outcome = &run.cycles[0];
        let count = |rule| outcome.records.iter().filter(|c| c.verdict.rule == Some(rule)).count();
        // 5% of at least 100 codes in each of four categories.
        assert!(count(AnomalyRule::NewCode) >= 20);
        assert!(count(AnomalyRule::DropToZero) >= 1);
        assert_eq!(count(AnomalyRule::GrandTotal), 4);
    }

    #[test]
    fn sample_csv_round_trips_through_ingest() {
        let batches = generate_cycles(&SampleConfig {
            months: 1,
            cycles_per_month: 2,
            ..small()
        })
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let paths = write_sample_csv(&dir.path().join("out"), &batches).unwrap();
        assert_eq!(paths.len(), 2);

        let back = load_cycle_csv(&paths[0]).unwrap();
        assert!(back.row_errors.is_empty());
        assert_eq!(back.batches.len(), 1);
        assert_eq!(back.batches[0].cycle, batches[0].cycle);
        assert_eq!(back.batches[0].records.len(), batches[0].records.len());
    }

    #[test]
    fn rejects_bad_config() {
        assert!(generate_cycles(&SampleConfig { cycles_per_month: 31, ..small() }).is_err());
        assert!(generate_cycles(&SampleConfig { new_code_fraction: 0.7, drop_fraction: 0.7, ..small() }).is_err());
        assert!(generate_cycles(&SampleConfig { max_codes: 10, ..small() }).is_err());
    }
}
