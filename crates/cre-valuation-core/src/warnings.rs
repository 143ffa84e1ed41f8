use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable warning codes attached to analyses and runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningCode {
    /// The IRR solver found no root in range; the IRR is reported as null.
    NonConvergentIrr,
    /// No period carries debt service, so DSCR is reported as zero.
    NoDebtService,
    /// Minimum DSCR below 1.20x
    LowDscr,
    /// Loan-to-value above 80%
    HighLeverage,
    /// A sensitivity grid point could not be evaluated.
    GridPointFailed,
}

impl WarningCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningCode::NonConvergentIrr => "NON_CONVERGENT_IRR",
            WarningCode::NoDebtService => "NO_DEBT_SERVICE",
            WarningCode::LowDscr => "LOW_DSCR",
            WarningCode::HighLeverage => "HIGH_LEVERAGE",
            WarningCode::GridPointFailed => "GRID_POINT_FAILED",
        }
    }
}

impl fmt::Display for WarningCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub code: WarningCode,
    pub message: String,
}

impl Warning {
    pub fn new(code: WarningCode, message: impl Into<String>) -> Self {
        Warning {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}
