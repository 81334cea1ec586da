//! Error types for upload request validation.

use crate::time::TimeError;
use thiserror::Error;

/// Errors raised while validating an upload against its authentication claims.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The key date falls outside the accepted window. User-correctable.
    #[error("Invalid key date: {0}")]
    InvalidDate(String),

    /// The validator was handed an object it does not understand.
    #[error("Illegal input: {0}")]
    IllegalInput(String),
}

impl From<TimeError> for ValidationError {
    fn from(e: TimeError) -> Self {
        match e {
            TimeError::InvalidDate(reason) => ValidationError::InvalidDate(reason),
            other => ValidationError::IllegalInput(other.to_string()),
        }
    }
}
