//! Core error taxonomy.

use thiserror::Error;

/// Errors surfaced by the lifecycle engine to its callers.
///
/// The HTTP layer maps these onto status codes (`AccessDenied` → 403,
/// `InvalidParameters` → 400, and so on); the core only classifies.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("container failed to start: {0}")]
    ContainerStartFailed(String),

    #[error("container did not respond in time")]
    NotResponding,

    #[error("illegal state transition: {0}")]
    IllegalState(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("expression error: {0}")]
    Expression(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
