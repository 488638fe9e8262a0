//! `billing-anomalies` library crate.
//!
//! The binary is a thin wrapper around this library so that:
//!
//! - the engine is testable without spawning processes
//! - the classifier can be embedded in other billing tooling
//!
//! Engine flow per cycle: `domain::validate_record` -> `metrics` ->
//! `classify` (rules + `thresholds`) -> `aggregate`, orchestrated by
//! `app::pipeline`.

pub mod aggregate;
pub mod app;
pub mod classify;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod io;
pub mod metrics;
pub mod notes;
pub mod report;
pub mod thresholds;
