//! File catalog: lookup, listing, visibility, deletion, lazy expiry.

use crate::quota::QuotaLedger;
use crate::reclaim::Reclaimer;
use std::sync::Arc;
use stowage_core::{Clock, Error, FileId, FileObject, FileState, OwnerId, Result, Visibility};
use stowage_metadata::MetadataStore;
use tracing::{info, instrument, warn};

/// Catalog of finalized file objects.
///
/// Expiry is evaluated lazily at read time: no background timer watches
/// TTLs. The first access that observes an expired file soft-deletes it,
/// releases its quota, and hands the bytes to the reclaimer.
pub struct FileRegistry {
    metadata: Arc<dyn MetadataStore>,
    quota: Arc<QuotaLedger>,
    clock: Arc<dyn Clock>,
    reclaimer: Arc<dyn Reclaimer>,
}

impl FileRegistry {
    /// Create a registry over the given stores.
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        quota: Arc<QuotaLedger>,
        clock: Arc<dyn Clock>,
        reclaimer: Arc<dyn Reclaimer>,
    ) -> Self {
        Self {
            metadata,
            quota,
            clock,
            reclaimer,
        }
    }

    /// Look up a live file.
    ///
    /// Soft-deleted files read as `NotFound`; files past their TTL are
    /// reaped on the spot and read as `Gone`.
    #[instrument(skip(self))]
    pub async fn resolve(&self, file_id: FileId) -> Result<FileObject> {
        let file = self.load_active(file_id).await?;
        match file.state_at(self.clock.now()) {
            FileState::Active => Ok(file),
            FileState::Expired => {
                self.reap(&file).await;
                Err(Error::Gone(format!("file {file_id} expired")))
            }
            FileState::Deleted => Err(Error::NotFound(format!("file {file_id}"))),
        }
    }

    /// Metadata for a live file, without touching its download count.
    ///
    /// Applies the same visibility rule as reads: private files are only
    /// described to their owner. No download quota is involved.
    pub async fn get_metadata(
        &self,
        file_id: FileId,
        requester: Option<OwnerId>,
    ) -> Result<FileObject> {
        let file = self.resolve(file_id).await?;
        if file.visibility == Visibility::Private && requester != Some(file.owner_id) {
            return Err(Error::Forbidden(format!("file {file_id} is private")));
        }
        Ok(file)
    }

    /// List an owner's live files, newest first.
    ///
    /// Expired files encountered in the listing are reaped and omitted.
    #[instrument(skip(self))]
    pub async fn list_files(&self, owner: OwnerId) -> Result<Vec<FileObject>> {
        let rows = self.metadata.list_files(*owner.as_uuid()).await?;
        let now = self.clock.now();

        let mut live = Vec::with_capacity(rows.len());
        for row in rows {
            let file = row.into_domain()?;
            match file.state_at(now) {
                FileState::Active => live.push(file),
                FileState::Expired => self.reap(&file).await,
                FileState::Deleted => {}
            }
        }
        Ok(live)
    }

    /// Flip a file between public and private. Owner only.
    #[instrument(skip(self))]
    pub async fn toggle_visibility(
        &self,
        file_id: FileId,
        requester: OwnerId,
    ) -> Result<Visibility> {
        let file = self.resolve(file_id).await?;
        if file.owner_id != requester {
            return Err(Error::Forbidden(format!(
                "only the owner may change visibility of file {file_id}"
            )));
        }

        let next = file.visibility.toggled();
        self.metadata
            .set_visibility(*file_id.as_uuid(), next.as_str())
            .await?;
        info!(%file_id, visibility = next.as_str(), "visibility changed");
        Ok(next)
    }

    /// Soft-delete a file and release its storage quota. Owner only.
    ///
    /// The metadata row is retained inactive; physical deletion runs
    /// asynchronously through the reclaimer.
    #[instrument(skip(self))]
    pub async fn delete(&self, file_id: FileId, requester: OwnerId) -> Result<()> {
        let file = self.load_active(file_id).await?;
        if file.owner_id != requester {
            return Err(Error::Forbidden(format!(
                "only the owner may delete file {file_id}"
            )));
        }

        // set_inactive reports whether this call made the transition, so a
        // concurrent delete or reap cannot release the quota twice.
        if self.metadata.set_inactive(*file_id.as_uuid()).await? {
            self.release_quota(&file).await;
            self.reclaimer.reclaim(vec![file.location.clone()]).await;
            info!(%file_id, owner = %file.owner_id, byte_size = file.byte_size, "file deleted");
        }
        Ok(())
    }

    /// Record a completed download against the file's counter.
    pub(crate) async fn record_download(&self, file_id: FileId) -> Result<()> {
        self.metadata
            .increment_download_count(*file_id.as_uuid())
            .await?;
        Ok(())
    }

    async fn load_active(&self, file_id: FileId) -> Result<FileObject> {
        let row = self
            .metadata
            .get_file(*file_id.as_uuid())
            .await?
            .ok_or_else(|| Error::NotFound(format!("file {file_id}")))?;
        let file = row.into_domain()?;
        if !file.active {
            return Err(Error::NotFound(format!("file {file_id}")));
        }
        Ok(file)
    }

    /// Retire an expired file: soft-delete, release quota, queue the bytes.
    async fn reap(&self, file: &FileObject) {
        match self.metadata.set_inactive(*file.file_id.as_uuid()).await {
            Ok(true) => {
                self.release_quota(file).await;
                self.reclaimer.reclaim(vec![file.location.clone()]).await;
                info!(file_id = %file.file_id, owner = %file.owner_id, "expired file reaped");
            }
            Ok(false) => {}
            Err(e) => {
                warn!(file_id = %file.file_id, error = %e, "failed to reap expired file");
            }
        }
    }

    async fn release_quota(&self, file: &FileObject) {
        if let Err(e) = self
            .quota
            .commit_storage(file.owner_id, -(file.byte_size as i64))
            .await
        {
            warn!(file_id = %file.file_id, error = %e, "failed to release storage quota");
        }
    }
}
