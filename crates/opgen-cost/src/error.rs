//! Error types for cost model construction

use thiserror::Error;

/// Result type for cost model operations
pub type Result<T> = std::result::Result<T, CostError>;

/// Errors that can occur while selecting or configuring a cost model
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CostError {
    /// Target family name not recognised
    #[error("Unknown target family: {0}")]
    UnknownTarget(String),

    /// A timing constant is negative or not a number
    #[error("Invalid timing constant '{name}': {value}")]
    InvalidTiming { name: &'static str, value: f64 },
}
