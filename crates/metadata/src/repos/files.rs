//! File object repository.

use crate::error::MetadataResult;
use crate::models::FileRow;
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for finalized file records.
#[async_trait]
pub trait FileRepo: Send + Sync {
    /// Persist a newly finalized file.
    async fn create_file(&self, file: &FileRow) -> MetadataResult<()>;

    /// Get a file by ID, whether active or not.
    async fn get_file(&self, file_id: Uuid) -> MetadataResult<Option<FileRow>>;

    /// List an owner's active files, newest first.
    async fn list_files(&self, owner_id: Uuid) -> MetadataResult<Vec<FileRow>>;

    /// Set a file's visibility. Errors with NotFound if the file is missing
    /// or inactive.
    async fn set_visibility(&self, file_id: Uuid, visibility: &str) -> MetadataResult<()>;

    /// Soft-delete: mark a file inactive. Returns true if the row
    /// transitioned from active, false if it was already inactive.
    async fn set_inactive(&self, file_id: Uuid) -> MetadataResult<bool>;

    /// Increment the download counter of a file.
    async fn increment_download_count(&self, file_id: Uuid) -> MetadataResult<()>;
}
