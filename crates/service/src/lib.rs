//! Service layer tying the metadata and byte stores into a file host.
//!
//! The [`FileHost`] facade owns the four cooperating components:
//! upload sessions, the quota ledger, the file registry, and the access
//! gate. All multi-step mutations coordinate through per-key async locks;
//! there is no global lock anywhere on the hot path.

pub mod access;
pub mod locks;
pub mod quota;
pub mod reclaim;
pub mod registry;
pub mod sessions;

pub use access::{AccessDecision, AccessGate, Denial};
pub use quota::QuotaLedger;
pub use reclaim::{Reclaimer, SpawnReclaimer};
pub use registry::FileRegistry;
pub use sessions::{ChunkAck, CompleteOptions, UploadSessionManager};

use bytes::Bytes;
use std::sync::Arc;
use stowage_core::config::ServiceConfig;
use stowage_core::{
    Clock, FileId, FileObject, OwnerId, QuotaUsage, Result, SessionId, SystemClock, Visibility,
};
use stowage_metadata::MetadataStore;
use stowage_storage::{ByteStream, ObjectStore};
use time::Duration;

/// Multi-tenant file host: uploads, quotas, retrieval, lifecycle.
pub struct FileHost {
    sessions: UploadSessionManager,
    registry: Arc<FileRegistry>,
    access: AccessGate,
    quota: Arc<QuotaLedger>,
}

impl FileHost {
    /// Build a host with the system clock and the spawning reclaimer.
    pub fn new(
        config: ServiceConfig,
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<dyn ObjectStore>,
    ) -> Self {
        let reclaimer = Arc::new(reclaim::SpawnReclaimer::new(storage.clone()));
        Self::with_parts(config, metadata, storage, Arc::new(SystemClock), reclaimer)
    }

    /// Build a host with explicit clock and reclaimer (test seam).
    pub fn with_parts(
        config: ServiceConfig,
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<dyn ObjectStore>,
        clock: Arc<dyn Clock>,
        reclaimer: Arc<dyn Reclaimer>,
    ) -> Self {
        let quota = Arc::new(QuotaLedger::new(
            metadata.clone(),
            clock.clone(),
            config.quota,
        ));
        let registry = Arc::new(FileRegistry::new(
            metadata.clone(),
            quota.clone(),
            clock.clone(),
            reclaimer,
        ));
        let sessions = UploadSessionManager::new(
            metadata,
            storage.clone(),
            quota.clone(),
            clock,
            config.upload,
        );
        let access = AccessGate::new(registry.clone(), storage, quota.clone());

        Self {
            sessions,
            registry,
            access,
            quota,
        }
    }

    // Uploads

    /// Open an upload session. See [`UploadSessionManager::start_session`].
    pub async fn start_upload(
        &self,
        owner: OwnerId,
        filename: &str,
        total_size: u64,
        chunk_count: u32,
    ) -> Result<SessionId> {
        self.sessions
            .start_session(owner, filename, total_size, chunk_count)
            .await
    }

    /// Admit one chunk into an open session.
    pub async fn submit_chunk(
        &self,
        session_id: SessionId,
        sequence: u32,
        data: Bytes,
    ) -> Result<ChunkAck> {
        self.sessions.submit_chunk(session_id, sequence, data).await
    }

    /// Received sequences for an in-flight session, ascending.
    pub async fn received_sequences(&self, session_id: SessionId) -> Result<Vec<u32>> {
        self.sessions.received_sequences(session_id).await
    }

    /// Sequences still missing for an in-flight session, ascending.
    pub async fn missing_sequences(&self, session_id: SessionId) -> Result<Vec<u32>> {
        self.sessions.missing_sequences(session_id).await
    }

    /// Whether a session has every expected chunk.
    pub async fn is_upload_complete(&self, session_id: SessionId) -> Result<bool> {
        self.sessions.is_complete(session_id).await
    }

    /// Finalize a session with default options (private, no TTL).
    pub async fn complete_upload(&self, session_id: SessionId) -> Result<FileObject> {
        self.sessions.complete(session_id).await
    }

    /// Finalize a session with explicit TTL and visibility.
    pub async fn complete_upload_with(
        &self,
        session_id: SessionId,
        opts: CompleteOptions,
    ) -> Result<FileObject> {
        self.sessions.complete_with(session_id, opts).await
    }

    /// Discard an in-flight session. Idempotent.
    pub async fn cancel_upload(&self, session_id: SessionId) -> Result<()> {
        self.sessions.cancel(session_id).await
    }

    /// Garbage-collect open sessions older than `max_age`.
    pub async fn sweep_uploads(&self, max_age: Duration) -> Result<usize> {
        self.sessions.sweep(max_age).await
    }

    /// Sweep using the configured session max age.
    pub async fn sweep_uploads_default(&self) -> Result<usize> {
        self.sessions.sweep_default().await
    }

    // Files

    /// Metadata for a live file; private files only describe themselves to
    /// their owner.
    pub async fn get_metadata(
        &self,
        file_id: FileId,
        requester: Option<OwnerId>,
    ) -> Result<FileObject> {
        self.registry.get_metadata(file_id, requester).await
    }

    /// List an owner's live files, newest first.
    pub async fn list_files(&self, owner: OwnerId) -> Result<Vec<FileObject>> {
        self.registry.list_files(owner).await
    }

    /// Flip a file between public and private. Owner only.
    pub async fn toggle_visibility(
        &self,
        file_id: FileId,
        requester: OwnerId,
    ) -> Result<Visibility> {
        self.registry.toggle_visibility(file_id, requester).await
    }

    /// Soft-delete a file, releasing its storage quota. Owner only.
    pub async fn delete_file(&self, file_id: FileId, requester: OwnerId) -> Result<()> {
        self.registry.delete(file_id, requester).await
    }

    // Reads

    /// Evaluate whether `requester` may read `file_id`, without charging.
    pub async fn check_read(
        &self,
        file_id: FileId,
        requester: Option<OwnerId>,
    ) -> Result<AccessDecision> {
        self.access.check_read(file_id, requester).await
    }

    /// Optimistic pre-flight for an upload of `size` bytes.
    pub async fn check_write(&self, owner: OwnerId, size: u64) -> Result<()> {
        self.access.check_write(owner, size).await
    }

    /// Open a file's bytes as a stream through the access gate, charging
    /// download quota for authenticated non-owners.
    pub async fn open(
        &self,
        file_id: FileId,
        requester: Option<OwnerId>,
    ) -> Result<(FileObject, ByteStream)> {
        self.access.open(file_id, requester).await
    }

    // Quotas

    /// Create the owner's quota account with default limits if absent.
    pub async fn ensure_account(&self, owner: OwnerId) -> Result<()> {
        self.quota.ensure_account(owner).await
    }

    /// Usage snapshot for an owner.
    pub async fn usage(&self, owner: OwnerId) -> Result<QuotaUsage> {
        self.quota.usage(owner).await
    }

    /// Overwrite an owner's limits.
    pub async fn set_limits(
        &self,
        owner: OwnerId,
        storage_limit: u64,
        download_limit: u64,
    ) -> Result<()> {
        self.quota.set_limits(owner, storage_limit, download_limit).await
    }
}
