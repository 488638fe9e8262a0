//! Threshold table: category -> (absolute change, percent change).
//!
//! The table is a plain value handed to the classifier, so a run (or a test)
//! can override any entry. A table loaded from disk may be partial; looking up
//! a category it does not contain is a configuration error.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::BillingCategory;
use crate::error::{AppError, EngineError};

/// Both limits must be reached for the magnitude rule to fire.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Minimum `|current - rolling average|`, in billing units.
    pub absolute_change: f64,
    /// Minimum `|delta / rolling average|`, as a fraction.
    pub percent_change: f64,
}

impl Thresholds {
    pub const fn new(absolute_change: f64, percent_change: f64) -> Self {
        Self {
            absolute_change,
            percent_change,
        }
    }

    fn check(&self) -> Result<(), String> {
        if !(self.absolute_change.is_finite() && self.absolute_change > 0.0) {
            return Err(format!("absolute_change must be > 0 (got {})", self.absolute_change));
        }
        if !(self.percent_change.is_finite() && self.percent_change > 0.0) {
            return Err(format!("percent_change must be > 0 (got {})", self.percent_change));
        }
        Ok(())
    }
}

/// Built-in limits per category.
pub fn default_thresholds(category: BillingCategory) -> Thresholds {
    match category {
        BillingCategory::SingleEventCharges => Thresholds::new(50_000.0, 0.25),
        BillingCategory::AccountCorrections => Thresholds::new(25_000.0, 0.25),
        BillingCategory::LineAddOns => Thresholds::new(25_000.0, 0.25),
        BillingCategory::SubscriptionPlans => Thresholds::new(50_000.0, 0.25),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdTable {
    entries: BTreeMap<BillingCategory, Thresholds>,
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self {
            entries: BillingCategory::ALL
                .into_iter()
                .map(|c| (c, default_thresholds(c)))
                .collect(),
        }
    }
}

impl ThresholdTable {
    /// A table with no entries; every lookup fails until entries are added.
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn with(mut self, category: BillingCategory, thresholds: Thresholds) -> Result<Self, EngineError> {
        thresholds
            .check()
            .map_err(|e| EngineError::Configuration(format!("{}: {e}", category.display_name())))?;
        self.entries.insert(category, thresholds);
        Ok(self)
    }

    pub fn thresholds_for(&self, category: BillingCategory) -> Result<Thresholds, EngineError> {
        self.entries.get(&category).copied().ok_or_else(|| {
            EngineError::Configuration(format!(
                "no thresholds configured for category `{}`",
                category.display_name()
            ))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (BillingCategory, Thresholds)> + '_ {
        self.entries.iter().map(|(c, t)| (*c, *t))
    }

    /// Parse a JSON object keyed by category (tag, display name or snake_case name).
    ///
    /// ```json
    /// { "SEC": { "absolute_change": 40000, "percent_change": 0.2 } }
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let raw: HashMap<String, Thresholds> = serde_json::from_str(json)
            .map_err(|e| EngineError::Configuration(format!("invalid thresholds JSON: {e}")))?;
        let mut table = Self::empty();
        for (label, thresholds) in raw {
            let category = BillingCategory::from_label(&label).ok_or_else(|| {
                EngineError::Configuration(format!("unknown category `{label}` in thresholds file"))
            })?;
            table = table.with(category, thresholds)?;
        }
        Ok(table)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, AppError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| AppError::new(2, format!("Failed to read thresholds '{}': {e}", path.display())))?;
        Ok(Self::from_json_str(&json)?)
    }

    pub fn write_json_file(&self, path: &Path) -> Result<(), AppError> {
        let file = File::create(path)
            .map_err(|e| AppError::new(2, format!("Failed to create thresholds '{}': {e}", path.display())))?;
        let map: BTreeMap<&str, Thresholds> = self.iter().map(|(c, t)| (c.tag(), t)).collect();
        serde_json::to_writer_pretty(file, &map)
            .map_err(|e| AppError::new(2, format!("Failed to write thresholds JSON: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_matches_published_limits() {
        let table = ThresholdTable::default();
        let sec = table.thresholds_for(BillingCategory::SingleEventCharges).unwrap();
        assert_eq!(sec, Thresholds::new(50_000.0, 0.25));
        let acr = table.thresholds_for(BillingCategory::AccountCorrections).unwrap();
        assert_eq!(acr.absolute_change, 25_000.0);
        let add = table.thresholds_for(BillingCategory::LineAddOns).unwrap();
        assert_eq!(add.absolute_change, 25_000.0);
        let sub = table.thresholds_for(BillingCategory::SubscriptionPlans).unwrap();
        assert_eq!(sub.absolute_change, 50_000.0);
    }

    #[test]
    fn missing_category_is_a_configuration_error() {
        let table = ThresholdTable::empty();
        let err = table.thresholds_for(BillingCategory::LineAddOns).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn json_overrides_accept_any_category_label() {
        let table = ThresholdTable::from_json_str(
            r#"{
                "SEC": {"absolute_change": 40000, "percent_change": 0.2},
                "Line Add-ons": {"absolute_change": 1000, "percent_change": 0.5}
            }"#,
        )
        .unwrap();
        assert_eq!(
            table.thresholds_for(BillingCategory::SingleEventCharges).unwrap(),
            Thresholds::new(40_000.0, 0.2)
        );
        assert!(table.thresholds_for(BillingCategory::SubscriptionPlans).is_err());
    }

    #[test]
    fn json_rejects_unknown_categories_and_bad_values() {
        assert!(ThresholdTable::from_json_str(r#"{"XYZ": {"absolute_change": 1, "percent_change": 0.1}}"#).is_err());
        assert!(ThresholdTable::from_json_str(r#"{"SEC": {"absolute_change": 0, "percent_change": 0.1}}"#).is_err());
        assert!(ThresholdTable::from_json_str("not json").is_err());
    }

    #[test]
    fn thresholds_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thresholds.json");
        let table = ThresholdTable::default()
            .with(BillingCategory::AccountCorrections, Thresholds::new(10_000.0, 0.1))
            .unwrap();
        table.write_json_file(&path).unwrap();
        let back = ThresholdTable::from_json_file(&path).unwrap();
        assert_eq!(back, table);
    }
}
