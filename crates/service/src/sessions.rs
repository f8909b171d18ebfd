//! Upload session lifecycle: creation, chunk admission, assembly, cleanup.

use crate::locks::LockMap;
use crate::quota::QuotaLedger;
use bytes::Bytes;
use std::sync::Arc;
use stowage_core::config::UploadConfig;
use stowage_core::{
    ChunkBitmap, ChunkFragment, Clock, ContentDigest, Error, FileId, FileObject, OwnerId, Result,
    SessionId, SessionState, UploadSession, Visibility,
};
use stowage_metadata::models::{ChunkFragmentRow, FileRow, UploadSessionRow};
use stowage_metadata::MetadataStore;
use stowage_storage::{ObjectStore, StreamingUpload};
use time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Acknowledgement returned for an admitted chunk.
#[derive(Clone, Debug)]
pub struct ChunkAck {
    /// The session the chunk belongs to.
    pub session_id: SessionId,
    /// The admitted sequence number.
    pub sequence: u32,
    /// Distinct sequences received so far.
    pub received: u32,
    /// Sequences the session expects in total.
    pub expected: u32,
    /// Whether every expected sequence has now been received.
    pub complete: bool,
}

/// Finalization options supplied at completion.
#[derive(Clone, Copy, Debug)]
pub struct CompleteOptions {
    /// Hours until expiry; 0 means unbounded.
    pub ttl_hours: u32,
    /// Initial visibility of the finalized file.
    pub visibility: Visibility,
}

impl Default for CompleteOptions {
    fn default() -> Self {
        Self {
            ttl_hours: 0,
            visibility: Visibility::Private,
        }
    }
}

/// Manages resumable chunked uploads from session start through assembly.
pub struct UploadSessionManager {
    metadata: Arc<dyn MetadataStore>,
    storage: Arc<dyn ObjectStore>,
    quota: Arc<QuotaLedger>,
    clock: Arc<dyn Clock>,
    config: UploadConfig,
    session_locks: LockMap<Uuid>,
}

impl UploadSessionManager {
    /// Create a session manager.
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        storage: Arc<dyn ObjectStore>,
        quota: Arc<QuotaLedger>,
        clock: Arc<dyn Clock>,
        config: UploadConfig,
    ) -> Self {
        Self {
            metadata,
            storage,
            quota,
            clock,
            config,
            session_locks: LockMap::new(),
        }
    }

    /// Open a new upload session.
    ///
    /// Validates the declared size against the system ceiling and runs the
    /// optimistic quota check, so a session that can never commit fails
    /// before any bytes move.
    #[instrument(skip(self))]
    pub async fn start_session(
        &self,
        owner: OwnerId,
        filename: &str,
        total_size: u64,
        chunk_count: u32,
    ) -> Result<SessionId> {
        self.config.validate_filename(filename)?;

        if total_size == 0 {
            return Err(Error::InvalidArgument(
                "declared size must be positive".to_string(),
            ));
        }
        if total_size > self.config.max_file_size {
            return Err(Error::InvalidArgument(format!(
                "declared size {total_size} exceeds maximum {}",
                self.config.max_file_size
            )));
        }
        if chunk_count == 0 || u64::from(chunk_count) > total_size {
            return Err(Error::InvalidArgument(format!(
                "chunk count {chunk_count} impossible for {total_size} bytes"
            )));
        }

        self.quota.ensure_account(owner).await?;
        // Optimistic check: concurrent sessions may still jointly exceed the
        // limit, which the authoritative recheck at completion catches.
        self.quota.require_storage(owner, total_size).await?;

        let session = UploadSession::new(owner, filename, total_size, chunk_count, self.clock.now());
        self.metadata
            .create_session(&UploadSessionRow::from_domain(&session))
            .await?;

        info!(session_id = %session.id, %owner, total_size, chunk_count, "upload session started");
        Ok(session.id)
    }

    /// Admit one chunk into the session.
    ///
    /// Resubmitting a sequence number overwrites the prior fragment; clients
    /// retrying a timed-out chunk must be able to do so safely.
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn submit_chunk(
        &self,
        session_id: SessionId,
        sequence: u32,
        data: Bytes,
    ) -> Result<ChunkAck> {
        let size = data.len() as u64;
        if size == 0 {
            return Err(Error::InvalidArgument("chunk must not be empty".to_string()));
        }
        if size > self.config.max_chunk_size {
            return Err(Error::ChunkTooLarge {
                size,
                max: self.config.max_chunk_size,
            });
        }

        let key = *session_id.as_uuid();
        let _guard = self.session_locks.acquire(&key).await;

        let session = self.load_open_session(session_id).await?;
        if sequence >= session.expected_chunk_count {
            return Err(Error::InvalidArgument(format!(
                "sequence {sequence} out of range (expected {} chunks)",
                session.expected_chunk_count
            )));
        }

        let location = UploadSession::chunk_key(session_id, sequence);
        self.storage
            .put(&location, data)
            .await
            .map_err(|e| Error::Storage(Box::new(e)))?;

        let fragment = ChunkFragment {
            session_id,
            sequence,
            length: size,
            location,
            received_at: self.clock.now(),
        };
        self.metadata
            .upsert_fragment(&ChunkFragmentRow::from_domain(&fragment))
            .await?;

        let received = self.metadata.get_received_sequences(key).await?.len() as u32;
        Ok(ChunkAck {
            session_id,
            sequence,
            received,
            expected: session.expected_chunk_count,
            complete: received == session.expected_chunk_count,
        })
    }

    /// Whether every expected chunk has been received.
    pub async fn is_complete(&self, session_id: SessionId) -> Result<bool> {
        let session = self.load_session(session_id).await?;
        let bitmap = self.bitmap(session_id).await?;
        Ok(bitmap.is_complete(session.expected_chunk_count))
    }

    /// Received sequence numbers, ascending (resume support).
    pub async fn received_sequences(&self, session_id: SessionId) -> Result<Vec<u32>> {
        self.load_session(session_id).await?;
        let bitmap = self.bitmap(session_id).await?;
        Ok(bitmap.sequences().collect())
    }

    /// Sequences still missing, ascending (resume support).
    pub async fn missing_sequences(&self, session_id: SessionId) -> Result<Vec<u32>> {
        let session = self.load_session(session_id).await?;
        let bitmap = self.bitmap(session_id).await?;
        Ok(bitmap.missing(session.expected_chunk_count))
    }

    /// Finalize a complete session with default options (private, no TTL).
    pub async fn complete(&self, session_id: SessionId) -> Result<FileObject> {
        self.complete_with(session_id, CompleteOptions::default()).await
    }

    /// Finalize a complete session into a file object.
    ///
    /// Assembly and digest computation happen outside any quota lock; the
    /// authoritative quota recheck and the storage commit are one critical
    /// section just before the file record is persisted.
    #[instrument(skip(self))]
    pub async fn complete_with(
        &self,
        session_id: SessionId,
        opts: CompleteOptions,
    ) -> Result<FileObject> {
        let key = *session_id.as_uuid();
        let _guard = self.session_locks.acquire(&key).await;

        // A concurrent cancel may have won the lock first; re-verify.
        let session = self.load_open_session(session_id).await?;

        let fragments: Vec<ChunkFragment> = {
            let rows = self.metadata.get_fragments(key).await?;
            rows.into_iter()
                .map(|row| row.into_domain())
                .collect::<std::result::Result<_, _>>()?
        };

        let bitmap = ChunkBitmap::from_sequences(fragments.iter().map(|f| f.sequence));
        if !bitmap.is_complete(session.expected_chunk_count) {
            return Err(Error::InvalidArgument(format!(
                "session incomplete: {} of {} chunks received",
                bitmap.cardinality(),
                session.expected_chunk_count
            )));
        }

        // The declared size is checked against the recorded fragment lengths
        // before any bytes move; a mismatched session leaves storage untouched.
        let assembled_len: u64 = fragments.iter().map(|f| f.length).sum();
        if assembled_len != session.declared_total_size {
            return Err(Error::SizeMismatch {
                declared: session.declared_total_size,
                assembled: assembled_len,
            });
        }

        let file_id = FileId::new();
        let location = FileObject::object_key(session.owner_id, file_id);

        // Fragments flow one at a time into a streaming upload, the digest
        // folding in as they pass. The full file is never held in memory.
        let mut upload = self
            .storage
            .put_stream(&location)
            .await
            .map_err(|e| Error::Storage(Box::new(e)))?;
        let mut hasher = ContentDigest::hasher();
        for fragment in &fragments {
            let data = match self.storage.get(&fragment.location).await {
                Ok(data) => data,
                Err(e) => {
                    abort_upload(upload).await;
                    return Err(Error::Storage(Box::new(e)));
                }
            };
            hasher.update(&data);
            if let Err(e) = upload.write(data).await {
                abort_upload(upload).await;
                return Err(Error::Storage(Box::new(e)));
            }
        }
        upload
            .finish()
            .await
            .map_err(|e| Error::Storage(Box::new(e)))?;

        // Authoritative recheck and commit. Two sessions from one owner can
        // each pass the optimistic check while jointly exceeding the limit;
        // exactly one of them commits here.
        if let Err(e) = self
            .quota
            .reserve_and_commit_storage(session.owner_id, assembled_len)
            .await
        {
            self.discard_object(&location).await;
            return Err(e);
        }

        let file = FileObject {
            file_id,
            owner_id: session.owner_id,
            display_name: session.declared_filename.clone(),
            location: location.clone(),
            byte_size: assembled_len,
            content_digest: hasher.finalize(),
            mime_hint: FileObject::guess_mime(&session.declared_filename),
            created_at: self.clock.now(),
            ttl_hours: opts.ttl_hours,
            visibility: opts.visibility,
            download_count: 0,
            active: true,
        };

        if let Err(e) = self.metadata.create_file(&FileRow::from_domain(&file)).await {
            // Roll back the commit so the ledger never counts a file that
            // was not recorded.
            if let Err(rollback) = self
                .quota
                .commit_storage(session.owner_id, -(assembled_len as i64))
                .await
            {
                warn!(%session_id, error = %rollback, "failed to roll back storage commit");
            }
            self.discard_object(&location).await;
            return Err(e.into());
        }

        self.metadata
            .set_session_state(key, SessionState::Completed.as_str())
            .await?;
        self.release_fragments(&fragments).await;
        self.metadata.delete_fragments(key).await?;

        info!(
            %session_id,
            file_id = %file.file_id,
            owner = %file.owner_id,
            byte_size = file.byte_size,
            digest = %file.content_digest,
            "upload completed"
        );

        // The session is terminal; its lock entry can be pruned.
        drop(_guard);
        self.session_locks.release(&key);
        Ok(file)
    }

    /// Discard a session and its fragments. Idempotent: cancelling an
    /// unknown or already-completed session is a no-op.
    #[instrument(skip(self))]
    pub async fn cancel(&self, session_id: SessionId) -> Result<()> {
        let key = *session_id.as_uuid();
        let result: Result<()> = async {
            let _guard = self.session_locks.acquire(&key).await;

            let session = match self.metadata.get_session(key).await? {
                Some(row) => row.into_domain()?,
                None => return Ok(()),
            };
            if session.state == SessionState::Open {
                self.discard_session_locked(&session).await?;
                info!(%session_id, "upload session cancelled");
            }
            Ok(())
        }
        .await;
        self.session_locks.release(&key);
        result
    }

    /// Garbage-collect open sessions older than `max_age`.
    ///
    /// Acquires each session's lock individually, never a global one, so
    /// concurrent uploads are not stalled. A failure on one session is
    /// logged and does not abort the sweep.
    #[instrument(skip(self))]
    pub async fn sweep(&self, max_age: Duration) -> Result<usize> {
        const SWEEP_BATCH: u32 = 1000;

        let cutoff = self.clock.now() - max_age;
        let stale = self.metadata.get_stale_open_sessions(cutoff, SWEEP_BATCH).await?;

        let mut swept = 0usize;
        for row in stale {
            let key = row.session_id;
            let result = async {
                let _guard = self.session_locks.acquire(&key).await;
                // Re-verify under the lock: the session may have completed
                // or been cancelled while we walked the batch.
                match self.metadata.get_session(key).await? {
                    Some(row) => {
                        let session = row.into_domain()?;
                        if session.state == SessionState::Open && session.created_at < cutoff {
                            self.discard_session_locked(&session).await?;
                            return Ok::<bool, Error>(true);
                        }
                        Ok(false)
                    }
                    None => Ok(false),
                }
            }
            .await;

            match result {
                Ok(true) => swept += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(session_id = %key, error = %e, "failed to sweep session, continuing");
                }
            }
            // Examined sessions must not park a lock entry, swept or not.
            self.session_locks.release(&key);
        }

        if swept > 0 {
            info!(swept, "swept abandoned upload sessions");
        }
        Ok(swept)
    }

    /// Sweep using the configured max age.
    pub async fn sweep_default(&self) -> Result<usize> {
        self.sweep(self.config.session_max_age()).await
    }

    async fn load_session(&self, session_id: SessionId) -> Result<UploadSession> {
        let row = self
            .metadata
            .get_session(*session_id.as_uuid())
            .await?
            .ok_or_else(|| Error::NotFound(format!("upload session {session_id}")))?;
        Ok(row.into_domain()?)
    }

    /// Load a session, rejecting terminal states with `Conflict`.
    async fn load_open_session(&self, session_id: SessionId) -> Result<UploadSession> {
        let session = self.load_session(session_id).await?;
        if session.state != SessionState::Open {
            return Err(Error::Conflict(format!(
                "upload session {session_id} already completed"
            )));
        }
        Ok(session)
    }

    async fn bitmap(&self, session_id: SessionId) -> Result<ChunkBitmap> {
        let sequences = self
            .metadata
            .get_received_sequences(*session_id.as_uuid())
            .await?;
        Ok(ChunkBitmap::from_sequences(
            sequences.into_iter().filter_map(|seq| u32::try_from(seq).ok()),
        ))
    }

    /// Delete fragment objects and the session row. Caller holds the lock.
    async fn discard_session_locked(&self, session: &UploadSession) -> Result<()> {
        let key = *session.id.as_uuid();
        let fragments: Vec<ChunkFragment> = {
            let rows = self.metadata.get_fragments(key).await?;
            rows.into_iter()
                .map(|row| row.into_domain())
                .collect::<std::result::Result<_, _>>()?
        };
        self.release_fragments(&fragments).await;
        self.metadata.delete_session(key).await?;
        Ok(())
    }

    /// Best-effort deletion of fragment bytes; metadata rows are the source
    /// of truth, so an orphaned object only wastes space until noticed.
    async fn release_fragments(&self, fragments: &[ChunkFragment]) {
        for fragment in fragments {
            self.discard_object(&fragment.location).await;
        }
    }

    async fn discard_object(&self, location: &str) {
        match self.storage.delete(location).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(%location, error = %e, "failed to delete object"),
        }
    }
}

async fn abort_upload(upload: Box<dyn StreamingUpload>) {
    if let Err(e) = upload.abort().await {
        warn!(error = %e, "failed to abort streaming upload");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage_core::config::QuotaConfig;
    use stowage_core::ManualClock;
    use stowage_metadata::{SqliteStore, UploadRepo};
    use stowage_storage::MemoryBackend;
    use time::macros::datetime;

    async fn manager() -> (tempfile::TempDir, Arc<UploadSessionManager>, Arc<ManualClock>) {
        let dir = tempfile::tempdir().unwrap();
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(dir.path().join("meta.db")).await.unwrap(),
        );
        let storage: Arc<dyn ObjectStore> = Arc::new(MemoryBackend::new());
        let clock = Arc::new(ManualClock::new(datetime!(2024-06-01 12:00 UTC)));
        let quota = Arc::new(QuotaLedger::new(
            metadata.clone(),
            clock.clone(),
            QuotaConfig::default(),
        ));
        let mut config = UploadConfig::default();
        config.allowed_extensions.clear();
        let manager = Arc::new(UploadSessionManager::new(
            metadata,
            storage,
            quota,
            clock.clone(),
            config,
        ));
        (dir, manager, clock)
    }

    #[tokio::test]
    async fn sweep_prunes_lock_entries_for_swept_sessions() {
        let (_dir, manager, clock) = manager().await;
        let owner = OwnerId::new();
        manager
            .start_session(owner, "a.bin", 10, 1)
            .await
            .unwrap();

        clock.advance(Duration::hours(48));
        assert_eq!(manager.sweep(Duration::hours(24)).await.unwrap(), 1);
        assert!(manager.session_locks.is_empty());
    }

    #[tokio::test]
    async fn sweep_prunes_lock_entries_for_examined_sessions() {
        let (_dir, manager, clock) = manager().await;
        let owner = OwnerId::new();
        let session_id = manager
            .start_session(owner, "a.bin", 10, 1)
            .await
            .unwrap();
        let key = *session_id.as_uuid();
        clock.advance(Duration::hours(48));

        // Hold the session lock so the sweep blocks after fetching its
        // batch, then complete the session out from under it. The sweep's
        // re-verification skips the session; its lock entry must still go.
        let guard = manager.session_locks.acquire(&key).await;
        let sweeper = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.sweep(Duration::hours(24)).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        manager
            .metadata
            .set_session_state(key, SessionState::Completed.as_str())
            .await
            .unwrap();
        drop(guard);
        manager.session_locks.release(&key);

        assert_eq!(sweeper.await.unwrap().unwrap(), 0);
        assert!(manager.session_locks.is_empty());
        assert!(manager.metadata.get_session(key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cancel_of_unknown_session_leaves_no_lock_entry() {
        let (_dir, manager, _clock) = manager().await;
        manager.cancel(SessionId::new()).await.unwrap();
        assert!(manager.session_locks.is_empty());
    }
}
