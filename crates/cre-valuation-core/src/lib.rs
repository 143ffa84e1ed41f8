pub mod assumptions;
pub mod baseline;
pub mod config;
pub mod error;
pub mod runs;
pub mod scenarios;
pub mod time_value;
pub mod types;
pub mod underwriting;
pub mod warnings;

pub use error::ValuationError;
pub use types::*;

/// Standard result type for all valuation computations
pub type ValuationResult<T> = Result<T, ValuationError>;
