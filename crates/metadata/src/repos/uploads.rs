//! Upload session repository.

use crate::error::MetadataResult;
use crate::models::{ChunkFragmentRow, UploadSessionRow};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for upload session and fragment tracking.
#[async_trait]
pub trait UploadRepo: Send + Sync {
    /// Create a new upload session.
    async fn create_session(&self, session: &UploadSessionRow) -> MetadataResult<()>;

    /// Get an upload session by ID.
    async fn get_session(&self, session_id: Uuid) -> MetadataResult<Option<UploadSessionRow>>;

    /// Update session state.
    async fn set_session_state(&self, session_id: Uuid, state: &str) -> MetadataResult<()>;

    /// Delete a session and its fragment rows. Idempotent.
    async fn delete_session(&self, session_id: Uuid) -> MetadataResult<()>;

    /// Record a received fragment, replacing any prior row for the same
    /// (session, sequence). Resubmission is an idempotent overwrite.
    async fn upsert_fragment(&self, fragment: &ChunkFragmentRow) -> MetadataResult<()>;

    /// Delete a session's fragment rows, leaving the session itself in
    /// place. Used at completion, where the session row is retained in a
    /// terminal state.
    async fn delete_fragments(&self, session_id: Uuid) -> MetadataResult<()>;

    /// Get a session's fragments ordered by sequence.
    async fn get_fragments(&self, session_id: Uuid) -> MetadataResult<Vec<ChunkFragmentRow>>;

    /// Get the received sequence numbers for a session, ascending.
    async fn get_received_sequences(&self, session_id: Uuid) -> MetadataResult<Vec<i64>>;

    /// Get open sessions created before `older_than`, oldest first.
    async fn get_stale_open_sessions(
        &self,
        older_than: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<UploadSessionRow>>;
}
