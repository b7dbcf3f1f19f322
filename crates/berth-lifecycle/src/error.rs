//! Lifecycle error types.

use berth_core::error::CoreError;
use berth_state::StoreError;
use thiserror::Error;

/// Errors from lifecycle operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("backend error: {0}")]
    Backend(String),
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
