//! Byte store error types.

use thiserror::Error;

/// Byte store operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// Whether the error is a missing-object condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<StorageError> for stowage_core::Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => stowage_core::Error::NotFound(key),
            other => stowage_core::Error::Storage(Box::new(other)),
        }
    }
}

/// Result type for byte store operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
