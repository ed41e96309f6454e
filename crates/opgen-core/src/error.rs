//! Error types for operator generation

use crate::TimePs;
use opgen_cost::CostError;
use thiserror::Error;

/// Result type for generator operations
pub type Result<T> = std::result::Result<T, GenError>;

/// Errors that abort the construction of an operator
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GenError {
    /// A single primitive is slower than the clock period
    #[error(
        "Operator '{operator}': {primitive} {widths:?} needs {delay:.1}ps, \
         which exceeds the {period:.1}ps clock period"
    )]
    InfeasibleTiming {
        operator: String,
        primitive: String,
        widths: Vec<u32>,
        delay: TimePs,
        period: TimePs,
    },

    /// No compressor applies to a column that still needs reduction
    #[error(
        "Operator '{operator}': no compressor applies to bit heap '{heap}' \
         at weight {weight} (height {height}, cycle {cycle})"
    )]
    CatalogExhausted {
        operator: String,
        heap: String,
        weight: i32,
        height: usize,
        cycle: u32,
    },

    /// Internal consistency check failed
    #[error("Operator '{operator}': invariant violated: {context}")]
    InvariantViolation { operator: String, context: String },

    /// Malformed request (widths, weights, names, configuration values)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration text could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Declaration attempted on a finalized operator
    #[error("Operator '{operator}' is finalized and cannot be modified")]
    Finalized { operator: String },

    /// Cost model error
    #[error("Cost model error: {0}")]
    Cost(#[from] CostError),
}

impl GenError {
    /// Shorthand for an invariant violation
    pub fn invariant(operator: &str, context: impl Into<String>) -> Self {
        Self::InvariantViolation {
            operator: operator.to_string(),
            context: context.into(),
        }
    }
}
