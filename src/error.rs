//! Error types.
//!
//! Two layers:
//!
//! - [`EngineError`]: typed failures raised by the classification engine
//!   (validation, configuration, aggregation). Each variant carries enough
//!   context for an operator to find the offending record.
//! - [`AppError`]: what the binary reports; a message plus a process exit code.
//!
//! Exit codes: `2` bad input/IO, `3` no usable data, `4` engine failure.

use thiserror::Error;

use crate::domain::CycleId;

/// Failures raised by the engine itself.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// A single record is malformed. Fails that record only.
    #[error("invalid record {code} in cycle {cycle}: {reason}")]
    Validation {
        cycle: CycleId,
        code: String,
        reason: String,
    },

    /// The threshold table is broken (unknown category, bad values).
    /// Fatal for the run.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A cycle summary was requested over an incomplete verdict set.
    /// Fatal for that cycle's summary only.
    #[error("cannot summarize cycle {cycle}: {reason}")]
    Aggregation { cycle: CycleId, reason: String },
}

impl EngineError {
    pub fn validation(cycle: CycleId, code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            cycle,
            code: code.into(),
            reason: reason.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            EngineError::Validation { .. } => 2,
            EngineError::Configuration(_) | EngineError::Aggregation { .. } => 4,
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        AppError::new(err.exit_code(), err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_map_to_exit_codes() {
        let cycle = CycleId::new(2025, 1, 3).unwrap();
        let err: AppError = EngineError::validation(cycle, "SEC001", "negative amount").into();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("SEC001"));
        assert!(err.to_string().contains("01-3-2025"));

        let err: AppError = EngineError::Configuration("missing category".to_string()).into();
        assert_eq!(err.exit_code(), 4);
    }
}
