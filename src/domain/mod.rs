//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - identifiers and enums (`CycleId`, `BillingCategory`, `Severity`, ...)
//! - the per-record value objects (`AmountSeries`, `ComputedMetrics`, `AnomalyVerdict`)
//! - run configuration (`RunConfig`, `ClassifierConfig`)
//! - input validation (`validate`)
//! - stable seed derivation for seeded RNGs (`seed`)

pub mod seed;
pub mod types;
pub mod validate;

pub use seed::SeedMixer;
pub use types::*;
pub use validate::*;
