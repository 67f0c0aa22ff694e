//! Error types for the Motorlot platform

use thiserror::Error;

/// Platform-wide error taxonomy.
///
/// "No active membership" and "quota exceeded" are deliberately absent:
/// those are Decision outcomes returned by the Entitlement Gate, never
/// errors.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Consistency violation: {0}")]
    Consistency(String),

    #[error("Record store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for PlatformError {
    fn from(err: serde_json::Error) -> Self {
        PlatformError::Internal(format!("serialization failed: {}", err))
    }
}

pub type PlatformResult<T> = Result<T, PlatformError>;
