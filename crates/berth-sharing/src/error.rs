//! Sharing error types.

use berth_core::error::CoreError;
use berth_lifecycle::LifecycleError;
use berth_state::StoreError;
use thiserror::Error;

/// Errors from the seat pool.
#[derive(Debug, Error)]
pub enum SharingError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("spec {0} has no sharing extension")]
    NotShared(String),

    #[error("timed out waiting for a seat for proxy {0}")]
    SeatWaitTimeout(String),
}

pub type SharingResult<T> = Result<T, SharingError>;
