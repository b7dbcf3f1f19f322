//! Store error types.

use thiserror::Error;

/// Errors from the store layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record already exists: {0}")]
    Duplicate(String),

    #[error("record not found: {0}")]
    NotFound(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
