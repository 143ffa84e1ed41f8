use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runs::model::ValuationRun;

/// Broad classes of failure, used by the orchestrator to decide whether an
/// error is returned to the caller or recorded on the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input, rejected before a run exists. User-correctable.
    Validation,
    /// Numerical failure while the pipeline was running. Fatal for the run.
    Computation,
    /// Storage failed after the run was computed.
    Persistence,
    NotFound,
    Cancelled,
    Serialization,
}

#[derive(Debug, Error)]
pub enum ValuationError {
    #[error("Invalid input: {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("Invalid loan terms: {0}")]
    InvalidLoanTerms(String),

    #[error("Degenerate cap rate {cap_rate}: exit cap rate must be positive")]
    DegenerateCapRate { cap_rate: Decimal },

    #[error("Division by zero in {context}")]
    DivisionByZero { context: String },

    #[error("Arithmetic overflow in {context}")]
    Overflow { context: String },

    #[error("Persistence failure for run {}: {reason}", run.id)]
    Persistence {
        reason: String,
        /// The fully computed run, so the caller can retry the write
        /// without recomputing.
        run: Box<ValuationRun>,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Run {run_id} is {status}; sensitivity requires a completed run")]
    RunNotCompleted { run_id: String, status: String },

    #[error("Sensitivity sweep cancelled after {completed} of {total} grid points")]
    Cancelled { completed: usize, total: usize },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ValuationError {
    pub(crate) fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValuationError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ValuationError::Validation { .. } | ValuationError::Config(_) => ErrorKind::Validation,
            ValuationError::InvalidLoanTerms(_)
            | ValuationError::DegenerateCapRate { .. }
            | ValuationError::DivisionByZero { .. }
            | ValuationError::Overflow { .. } => ErrorKind::Computation,
            ValuationError::Persistence { .. } | ValuationError::Storage(_) => {
                ErrorKind::Persistence
            }
            ValuationError::NotFound { .. } | ValuationError::RunNotCompleted { .. } => {
                ErrorKind::NotFound
            }
            ValuationError::Cancelled { .. } => ErrorKind::Cancelled,
            ValuationError::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Field name for validation errors, `None` otherwise.
    pub fn field(&self) -> Option<&str> {
        match self {
            ValuationError::Validation { field, .. } => Some(field),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ValuationError {
    fn from(e: serde_json::Error) -> Self {
        ValuationError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for ValuationError {
    fn from(e: std::io::Error) -> Self {
        ValuationError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            ValuationError::validation("purchase_price", "must be positive").kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            ValuationError::DegenerateCapRate { cap_rate: dec!(0) }.kind(),
            ErrorKind::Computation
        );
        assert_eq!(
            ValuationError::Cancelled {
                completed: 1,
                total: 4
            }
            .kind(),
            ErrorKind::Cancelled
        );
    }

    #[test]
    fn test_validation_message_names_field() {
        let err = ValuationError::validation("exit_cap_rate", "must be in (0, 1]");
        assert_eq!(err.field(), Some("exit_cap_rate"));
        assert!(err.to_string().contains("exit_cap_rate"));
    }
}
