//! Data sources other than provider snapshots.

pub mod sample;

pub use sample::*;
