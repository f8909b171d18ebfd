//! Quota ledger: per-owner storage and download accounting.
//!
//! All quota checks and commits for one owner funnel through this type.
//! `try_*` operations compare against the limit; `commit_*` operations apply
//! deltas. The authoritative check-and-commit used at upload completion is a
//! single critical section under the owner's lock, which is what closes the
//! race between two concurrent completions that each pass their optimistic
//! check individually.

use crate::locks::LockMap;
use std::sync::Arc;
use stowage_core::config::QuotaConfig;
use stowage_core::{Clock, Error, OwnerId, QuotaAccount, QuotaUsage, Result};
use stowage_metadata::models::QuotaAccountRow;
use stowage_metadata::MetadataStore;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Per-owner consumption ledger.
pub struct QuotaLedger {
    metadata: Arc<dyn MetadataStore>,
    clock: Arc<dyn Clock>,
    config: QuotaConfig,
    owner_locks: LockMap<Uuid>,
}

impl QuotaLedger {
    /// Create a ledger over the given metadata store.
    pub fn new(metadata: Arc<dyn MetadataStore>, clock: Arc<dyn Clock>, config: QuotaConfig) -> Self {
        Self {
            metadata,
            clock,
            config,
            owner_locks: LockMap::new(),
        }
    }

    /// Create an account with default limits on first touch; no-op if one
    /// already exists.
    pub async fn ensure_account(&self, owner: OwnerId) -> Result<()> {
        let account = QuotaAccount::new(
            owner,
            self.config.default_storage_limit,
            self.config.default_download_limit,
            self.clock.now(),
        );
        self.metadata
            .ensure_account(&QuotaAccountRow::from_domain(&account))
            .await?;
        Ok(())
    }

    /// Fetch an owner's account.
    async fn account(&self, owner: OwnerId) -> Result<QuotaAccount> {
        let row = self
            .metadata
            .get_account(*owner.as_uuid())
            .await?
            .ok_or_else(|| Error::NotFound(format!("quota account for owner {owner}")))?;
        Ok(row.into_domain())
    }

    /// Side-effect-free storage headroom check.
    #[instrument(skip(self))]
    pub async fn try_reserve_storage(&self, owner: OwnerId, size: u64) -> Result<bool> {
        let account = self.account(owner).await?;
        Ok(account.storage_fits(size))
    }

    /// Storage headroom check that reports the violation as a typed error.
    pub async fn require_storage(&self, owner: OwnerId, size: u64) -> Result<()> {
        let account = self.account(owner).await?;
        if account.storage_fits(size) {
            Ok(())
        } else {
            Err(Error::StorageQuotaExceeded {
                used: account.storage_used,
                requested: size,
                limit: account.storage_limit,
            })
        }
    }

    /// Apply a signed storage delta under the owner's lock.
    ///
    /// The single source of truth for `storage_used`: file creation commits
    /// a positive delta, deletion a compensating negative one.
    #[instrument(skip(self))]
    pub async fn commit_storage(&self, owner: OwnerId, delta: i64) -> Result<()> {
        let key = *owner.as_uuid();
        let _guard = self.owner_locks.acquire(&key).await;
        self.metadata.adjust_storage_used(key, delta).await?;
        debug!(%owner, delta, "storage delta committed");
        Ok(())
    }

    /// The authoritative check-and-commit at upload completion: verify
    /// headroom and apply the increment in one critical section.
    ///
    /// Callers must perform assembly and digest I/O *before* calling; the
    /// lock is held only for the counter read and update.
    #[instrument(skip(self))]
    pub async fn reserve_and_commit_storage(&self, owner: OwnerId, size: u64) -> Result<()> {
        let key = *owner.as_uuid();
        let _guard = self.owner_locks.acquire(&key).await;

        let account = self.account(owner).await?;
        if !account.storage_fits(size) {
            return Err(Error::StorageQuotaExceeded {
                used: account.storage_used,
                requested: size,
                limit: account.storage_limit,
            });
        }
        self.metadata.adjust_storage_used(key, size as i64).await?;
        debug!(%owner, size, "storage reserved and committed");
        Ok(())
    }

    /// Download headroom check with lazy period reset.
    ///
    /// If now() has crossed into a new period relative to the anchor, the
    /// counter is zeroed and the anchor advanced *before* the comparison.
    /// Reset and check happen under the owner's lock so two concurrent
    /// callers cannot both observe the stale period.
    #[instrument(skip(self))]
    pub async fn try_reserve_download(&self, owner: OwnerId, size: u64) -> Result<bool> {
        let account = self.reset_period_if_elapsed(owner).await?;
        Ok(account.download_fits(size))
    }

    /// Download headroom check that reports the violation as a typed error.
    pub async fn require_download(&self, owner: OwnerId, size: u64) -> Result<()> {
        let account = self.reset_period_if_elapsed(owner).await?;
        if account.download_fits(size) {
            Ok(())
        } else {
            Err(Error::DownloadQuotaExceeded {
                used: account.download_used,
                requested: size,
                limit: account.download_limit,
            })
        }
    }

    /// Record downloaded bytes. Invoked only after bytes were actually
    /// released, so failed transfers never consume quota.
    #[instrument(skip(self))]
    pub async fn commit_download(&self, owner: OwnerId, size: u64) -> Result<()> {
        let key = *owner.as_uuid();
        let _guard = self.owner_locks.acquire(&key).await;
        self.metadata.adjust_download_used(key, size as i64).await?;
        Ok(())
    }

    /// Usage snapshot with the lazy period reset applied, so the reported
    /// download counter is never from a stale period.
    pub async fn usage(&self, owner: OwnerId) -> Result<QuotaUsage> {
        let account = self.reset_period_if_elapsed(owner).await?;
        Ok(QuotaUsage::from_account(&account))
    }

    /// Overwrite an owner's limits (administrative path).
    pub async fn set_limits(
        &self,
        owner: OwnerId,
        storage_limit: u64,
        download_limit: u64,
    ) -> Result<()> {
        self.metadata
            .set_limits(*owner.as_uuid(), storage_limit as i64, download_limit as i64)
            .await?;
        Ok(())
    }

    async fn reset_period_if_elapsed(&self, owner: OwnerId) -> Result<QuotaAccount> {
        let key = *owner.as_uuid();
        let _guard = self.owner_locks.acquire(&key).await;

        let mut account = self.account(owner).await?;
        let now = self.clock.now();
        if account.period_elapsed(now, self.config.period()) {
            self.metadata.reset_download_period(key, now).await?;
            debug!(%owner, "download period reset");
            account.download_used = 0;
            account.period_anchor = now;
        }
        Ok(account)
    }
}
