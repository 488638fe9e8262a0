//! Input validation: `RawRecord` -> `BillingRecord`.
//!
//! Every malformed record is rejected here, before any metric is computed.
//! A rejection fails that record only; the caller decides whether the cycle
//! continues.

use crate::domain::{
    AmountSeries, BillingCategory, BillingRecord, HISTORY_LEN, HistorySlot, RawRecord,
};
use crate::error::EngineError;

/// Validate one raw record.
///
/// The new-code flag, when supplied, must agree with the history:
///
/// - flagged new: zero-valued slots are read as "did not exist yet"; any
///   positive slot is a contradiction
/// - flagged existing: at least one slot must be present; zeros stay zeros
/// - unflagged: a history with no positive slot is a code that was never
///   billed, so it is read as new
pub fn validate_record(raw: &RawRecord) -> Result<BillingRecord, EngineError> {
    let reject = |reason: String| EngineError::validation(raw.cycle, raw.code.clone(), reason);

    if let Some(defect) = &raw.defect {
        return Err(reject(defect.clone()));
    }

    let code = raw.code.trim();
    if code.is_empty() {
        return Err(reject("empty billing code".to_string()));
    }

    let category = BillingCategory::from_label(&raw.category)
        .ok_or_else(|| reject(format!("unknown billing category `{}`", raw.category)))?;

    if raw.history.len() != HISTORY_LEN {
        return Err(reject(format!(
            "expected {HISTORY_LEN} historical amounts, got {}",
            raw.history.len()
        )));
    }

    let mut history = [HistorySlot::Missing; HISTORY_LEN];
    for (slot, value) in history.iter_mut().zip(&raw.history) {
        *slot = HistorySlot::from(*value);
    }

    // Amounts are checked as supplied, before any slot is reinterpreted.
    let supplied = AmountSeries::new(history, raw.current).map_err(reject)?;

    let series = match raw.new_code {
        Some(true) if supplied.any_positive() => {
            return Err(reject(
                "flagged as a new code but has positive billing history".to_string(),
            ));
        }
        Some(false) if supplied.all_missing() => {
            return Err(reject(
                "flagged as an existing code but every historical amount is missing".to_string(),
            ));
        }
        Some(true) | None if !supplied.any_positive() => {
            AmountSeries::new([HistorySlot::Missing; HISTORY_LEN], raw.current).map_err(reject)?
        }
        _ => supplied,
    };

    Ok(BillingRecord {
        cycle: raw.cycle,
        category,
        code: code.to_string(),
        description: raw
            .description
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty()),
        series,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CycleId;

    fn raw(history: Vec<Option<f64>>, current: f64) -> RawRecord {
        RawRecord {
            line: Some(2),
            cycle: CycleId::new(2025, 2, 4).unwrap(),
            category: "SEC".to_string(),
            code: "SEC014".to_string(),
            description: Some("  Late fee  ".to_string()),
            history,
            current,
            new_code: None,
            defect: None,
        }
    }

    #[test]
    fn accepts_well_formed_record() {
        let rec = validate_record(&raw(vec![Some(1.0), None, Some(0.0), Some(3.0), Some(4.0)], 5.0)).unwrap();
        assert_eq!(rec.category, BillingCategory::SingleEventCharges);
        assert_eq!(rec.description.as_deref(), Some("Late fee"));
        assert_eq!(rec.series.history()[1], HistorySlot::Missing);
        assert_eq!(rec.series.history()[2], HistorySlot::Amount(0.0));
    }

    #[test]
    fn unreadable_source_rows_are_rejected() {
        let mut r = raw(vec![Some(1.0); 5], 5.0);
        r.defect = Some("5 months ago: ambiguous amount `n/a`".to_string());
        let err = validate_record(&r).unwrap_err();
        assert!(err.to_string().contains("SEC014"));
        assert!(err.to_string().contains("ambiguous amount"));
    }

    #[test]
    fn rejects_wrong_history_length() {
        let err = validate_record(&raw(vec![Some(1.0); 4], 5.0)).unwrap_err();
        match err {
            EngineError::Validation { code, reason, .. } => {
                assert_eq!(code, "SEC014");
                assert!(reason.contains("expected 5"), "{reason}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_negative_amounts() {
        assert!(validate_record(&raw(vec![Some(1.0); 5], -0.01)).is_err());
        assert!(validate_record(&raw(vec![Some(-1.0), None, None, None, None], 1.0)).is_err());
    }

    #[test]
    fn rejects_unknown_category() {
        let mut r = raw(vec![Some(1.0); 5], 1.0);
        r.category = "Roaming".to_string();
        let err = validate_record(&r).unwrap_err();
        assert!(err.to_string().contains("Roaming"));
    }

    #[test]
    fn new_code_flag_turns_zero_slots_into_missing() {
        let mut r = raw(vec![Some(0.0); 5], 5_000.0);
        r.new_code = Some(true);
        let rec = validate_record(&r).unwrap();
        assert!(rec.series.all_missing());
    }

    #[test]
    fn unflagged_never_billed_history_reads_as_new_code() {
        let rec = validate_record(&raw(vec![Some(0.0); 5], 5_000.0)).unwrap();
        assert!(rec.series.all_missing());
        assert_eq!(rec.series.current(), 5_000.0);

        let rec = validate_record(&raw(vec![None, Some(0.0), None, Some(0.0), None], 5_000.0)).unwrap();
        assert!(rec.series.all_missing());
    }

    #[test]
    fn existing_flag_keeps_zero_history() {
        let mut r = raw(vec![Some(0.0); 5], 5_000.0);
        r.new_code = Some(false);
        let rec = validate_record(&r).unwrap();
        assert_eq!(rec.series.history()[0], HistorySlot::Amount(0.0));
    }

    #[test]
    fn negative_amounts_are_rejected_before_zero_history_is_reinterpreted() {
        assert!(validate_record(&raw(vec![Some(-3.0); 5], 1.0)).is_err());
        let mut r = raw(vec![Some(-3.0), None, None, None, None], 1.0);
        r.new_code = Some(true);
        assert!(validate_record(&r).is_err());
    }

    #[test]
    fn contradictory_new_code_flags_are_rejected() {
        let mut r = raw(vec![None, None, None, None, Some(10.0)], 5_000.0);
        r.new_code = Some(true);
        assert!(validate_record(&r).is_err());

        let mut r = raw(vec![None; 5], 5_000.0);
        r.new_code = Some(false);
        assert!(validate_record(&r).is_err());
    }
}
