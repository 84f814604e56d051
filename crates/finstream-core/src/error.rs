//! Error types for finstream-core.

use thiserror::Error;

/// Reasons a tick or notification is refused before it reaches the store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Missing symbol")]
    MissingSymbol,

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Non-finite {field}: {value}")]
    NonFinite { field: &'static str, value: f64 },

    #[error("Negative price: {0}")]
    NegativePrice(f64),
}

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Result type alias for core operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
