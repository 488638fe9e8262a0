//! Input/output helpers.
//!
//! - snapshot CSV ingest (`ingest`)
//! - verdict and snapshot CSV exports (`export`)
//! - run report JSON read/write (`run`)

pub mod export;
pub mod ingest;
pub mod run;

pub use export::*;
pub use ingest::*;
pub use run::*;
