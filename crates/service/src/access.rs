//! Access gate: every read passes through here before bytes move.

use crate::quota::QuotaLedger;
use crate::registry::FileRegistry;
use std::sync::Arc;
use stowage_core::{Error, FileId, FileObject, OwnerId, Result, Visibility};
use stowage_storage::{ByteStream, ObjectStore};
use tracing::{debug, instrument};

/// Why a read was refused.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Denial {
    /// No such live file.
    NotFound,
    /// The file existed but has passed its TTL.
    Gone,
    /// The file is private and the requester is not its owner.
    Forbidden,
    /// The requester's download ceiling cannot cover this file.
    DownloadQuotaExceeded {
        used: u64,
        requested: u64,
        limit: u64,
    },
}

impl Denial {
    fn into_error(self, file_id: FileId) -> Error {
        match self {
            Self::NotFound => Error::NotFound(format!("file {file_id}")),
            Self::Gone => Error::Gone(format!("file {file_id} expired")),
            Self::Forbidden => Error::Forbidden(format!("file {file_id} is private")),
            Self::DownloadQuotaExceeded {
                used,
                requested,
                limit,
            } => Error::DownloadQuotaExceeded {
                used,
                requested,
                limit,
            },
        }
    }
}

/// Outcome of an access check.
#[derive(Clone, Debug)]
pub enum AccessDecision {
    /// The read may proceed; carries the resolved file.
    Allow(FileObject),
    /// The read is refused.
    Deny(Denial),
}

impl AccessDecision {
    /// Whether the read may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }

    /// Convert a denial into the matching typed error.
    pub fn into_result(self, file_id: FileId) -> Result<FileObject> {
        match self {
            Self::Allow(file) => Ok(file),
            Self::Deny(denial) => Err(denial.into_error(file_id)),
        }
    }
}

/// Decides whether a requester may read a file, and performs gated reads.
///
/// Owners always read their own files without download accounting.
/// Anonymous requesters may read public files, also unaccounted; there is
/// no account to charge. Authenticated non-owners are charged against
/// their own download ceiling.
pub struct AccessGate {
    registry: Arc<FileRegistry>,
    storage: Arc<dyn ObjectStore>,
    quota: Arc<QuotaLedger>,
}

impl AccessGate {
    /// Create an access gate.
    pub fn new(
        registry: Arc<FileRegistry>,
        storage: Arc<dyn ObjectStore>,
        quota: Arc<QuotaLedger>,
    ) -> Self {
        Self {
            registry,
            storage,
            quota,
        }
    }

    /// Evaluate whether `requester` may read `file_id`.
    ///
    /// Side-effect free with respect to quotas: nothing is charged until
    /// the read actually happens in [`AccessGate::open`]. Resolving the
    /// file may still reap it if its TTL has lapsed.
    #[instrument(skip(self))]
    pub async fn check_read(
        &self,
        file_id: FileId,
        requester: Option<OwnerId>,
    ) -> Result<AccessDecision> {
        let file = match self.registry.resolve(file_id).await {
            Ok(file) => file,
            Err(Error::NotFound(_)) => return Ok(AccessDecision::Deny(Denial::NotFound)),
            Err(Error::Gone(_)) => return Ok(AccessDecision::Deny(Denial::Gone)),
            Err(e) => return Err(e),
        };

        let is_owner = requester == Some(file.owner_id);
        if file.visibility == Visibility::Private && !is_owner {
            return Ok(AccessDecision::Deny(Denial::Forbidden));
        }
        if is_owner {
            return Ok(AccessDecision::Allow(file));
        }

        match requester {
            // Public file, anonymous requester: allowed, unaccounted.
            None => Ok(AccessDecision::Allow(file)),
            Some(requester) => {
                self.quota.ensure_account(requester).await?;
                match self.quota.require_download(requester, file.byte_size).await {
                    Ok(()) => Ok(AccessDecision::Allow(file)),
                    Err(Error::DownloadQuotaExceeded {
                        used,
                        requested,
                        limit,
                    }) => Ok(AccessDecision::Deny(Denial::DownloadQuotaExceeded {
                        used,
                        requested,
                        limit,
                    })),
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Optimistic pre-flight for an upload of `size` bytes.
    pub async fn check_write(&self, owner: OwnerId, size: u64) -> Result<()> {
        self.quota.ensure_account(owner).await?;
        self.quota.require_storage(owner, size).await
    }

    /// Open a file's bytes as a stream through the gate.
    ///
    /// Download usage is charged only once the stream is open, so a file
    /// whose backing object has gone missing never burns quota. The caller
    /// drives the stream; the full file is never buffered here.
    #[instrument(skip(self))]
    pub async fn open(
        &self,
        file_id: FileId,
        requester: Option<OwnerId>,
    ) -> Result<(FileObject, ByteStream)> {
        let decision = self.check_read(file_id, requester).await?;
        let file = decision.into_result(file_id)?;

        let stream = self
            .storage
            .get_stream(&file.location)
            .await
            .map_err(|e| Error::Storage(Box::new(e)))?;

        if let Some(requester) = requester {
            if requester != file.owner_id {
                self.quota.commit_download(requester, file.byte_size).await?;
            }
        }
        self.registry.record_download(file_id).await?;

        debug!(%file_id, byte_size = file.byte_size, "file opened");
        Ok((file, stream))
    }
}
