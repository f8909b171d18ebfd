//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
///
/// Every variant except `Metadata` and `Storage` is a recoverable,
/// caller-facing condition; the two passthrough variants surface provider
/// unavailability as-is (retry policy belongs to the caller).
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage quota exceeded: used {used} + requested {requested} > limit {limit}")]
    StorageQuotaExceeded {
        used: u64,
        requested: u64,
        limit: u64,
    },

    #[error("download quota exceeded: used {used} + requested {requested} > limit {limit}")]
    DownloadQuotaExceeded {
        used: u64,
        requested: u64,
        limit: u64,
    },

    #[error("size mismatch: declared {declared} bytes, assembled {assembled}")]
    SizeMismatch { declared: u64, assembled: u64 },

    #[error("chunk too large: {size} bytes (max {max})")]
    ChunkTooLarge { size: u64, max: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("gone: {0}")]
    Gone(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("metadata error: {0}")]
    Metadata(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Whether the error denotes a quota violation (storage or download).
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(
            self,
            Self::StorageQuotaExceeded { .. } | Self::DownloadQuotaExceeded { .. }
        )
    }

    /// Whether the error is a recoverable, caller-facing condition rather
    /// than a provider failure.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Metadata(_) | Self::Storage(_))
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
