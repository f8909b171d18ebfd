//! Metadata store error types.

use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<MetadataError> for stowage_core::Error {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::NotFound(what) => stowage_core::Error::NotFound(what),
            MetadataError::AlreadyExists(what) => stowage_core::Error::Conflict(what),
            other => stowage_core::Error::Metadata(Box::new(other)),
        }
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
