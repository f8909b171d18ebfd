//! Quota account repository.
//!
//! Mutations here are atomic single-row read-modify-writes; the serialization
//! of check-then-commit sequences against one owner is the quota ledger's
//! job, not this layer's.

use crate::error::MetadataResult;
use crate::models::QuotaAccountRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for per-owner quota accounting.
#[async_trait]
pub trait QuotaRepo: Send + Sync {
    /// Create an account if none exists for the owner; a no-op otherwise.
    async fn ensure_account(&self, account: &QuotaAccountRow) -> MetadataResult<()>;

    /// Get an owner's account.
    async fn get_account(&self, owner_id: Uuid) -> MetadataResult<Option<QuotaAccountRow>>;

    /// Apply a signed delta to storage_used atomically. Negative results
    /// clamp to zero so a double compensation can never underflow.
    async fn adjust_storage_used(&self, owner_id: Uuid, delta: i64) -> MetadataResult<()>;

    /// Apply a signed delta to download_used atomically, clamped at zero.
    async fn adjust_download_used(&self, owner_id: Uuid, delta: i64) -> MetadataResult<()>;

    /// Zero download_used and advance the period anchor.
    async fn reset_download_period(
        &self,
        owner_id: Uuid,
        anchor: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Overwrite an owner's limits (administrative path).
    async fn set_limits(
        &self,
        owner_id: Uuid,
        storage_limit: i64,
        download_limit: i64,
    ) -> MetadataResult<()>;
}
