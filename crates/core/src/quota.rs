//! Quota account model and period arithmetic.

use crate::id::OwnerId;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// Per-owner consumption accounting.
///
/// `storage_used` is a durable running total kept in lock-step with file
/// creation and deletion; it is never recomputed by summation on the hot
/// path. `download_used` is period-bound and resets lazily the first time a
/// check crosses into a new period relative to `period_anchor`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuotaAccount {
    /// Owning account.
    pub owner_id: OwnerId,
    /// Storage ceiling in bytes.
    pub storage_limit: u64,
    /// Bytes currently attributed to live files.
    pub storage_used: u64,
    /// Download ceiling in bytes per period.
    pub download_limit: u64,
    /// Bytes downloaded in the current period.
    pub download_used: u64,
    /// Start of the current download period.
    #[serde(with = "time::serde::rfc3339")]
    pub period_anchor: OffsetDateTime,
}

impl QuotaAccount {
    /// Create a fresh account with the given limits.
    pub fn new(
        owner_id: OwnerId,
        storage_limit: u64,
        download_limit: u64,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            owner_id,
            storage_limit,
            storage_used: 0,
            download_limit,
            download_used: 0,
            period_anchor: now,
        }
    }

    /// storage_limit minus storage_used.
    pub fn storage_headroom(&self) -> u64 {
        self.storage_limit.saturating_sub(self.storage_used)
    }

    /// Whether `size` additional bytes fit within the storage ceiling.
    pub fn storage_fits(&self, size: u64) -> bool {
        size <= self.storage_headroom()
    }

    /// Whether `now` has crossed into a new download period.
    pub fn period_elapsed(&self, now: OffsetDateTime, period: Duration) -> bool {
        now - self.period_anchor >= period
    }

    /// Whether `size` additional download bytes fit in the current period.
    /// Callers must reset the period first if it has elapsed.
    pub fn download_fits(&self, size: u64) -> bool {
        size <= self.download_limit.saturating_sub(self.download_used)
    }
}

/// Point-in-time usage snapshot reported to callers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub owner_id: OwnerId,
    pub storage_limit: u64,
    pub storage_used: u64,
    pub storage_headroom: u64,
    pub download_limit: u64,
    pub download_used: u64,
    /// When the current download period began.
    #[serde(with = "time::serde::rfc3339")]
    pub period_anchor: OffsetDateTime,
}

impl QuotaUsage {
    /// Build a snapshot from an account.
    pub fn from_account(account: &QuotaAccount) -> Self {
        Self {
            owner_id: account.owner_id,
            storage_limit: account.storage_limit,
            storage_used: account.storage_used,
            storage_headroom: account.storage_headroom(),
            download_limit: account.download_limit,
            download_used: account.download_used,
            period_anchor: account.period_anchor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn account(storage_used: u64) -> QuotaAccount {
        QuotaAccount {
            owner_id: OwnerId::new(),
            storage_limit: 1000,
            storage_used,
            download_limit: 500,
            download_used: 0,
            period_anchor: datetime!(2024-03-01 00:00 UTC),
        }
    }

    #[test]
    fn test_storage_headroom() {
        let acct = account(900);
        assert_eq!(acct.storage_headroom(), 100);
        assert!(acct.storage_fits(100));
        assert!(!acct.storage_fits(150));
    }

    #[test]
    fn test_headroom_saturates_when_overcommitted() {
        // Limits can be lowered below current usage by an administrator.
        let mut acct = account(0);
        acct.storage_used = 2000;
        assert_eq!(acct.storage_headroom(), 0);
        assert!(!acct.storage_fits(1));
    }

    #[test]
    fn test_period_elapsed() {
        let acct = account(0);
        let period = Duration::hours(24);
        assert!(!acct.period_elapsed(datetime!(2024-03-01 23:59 UTC), period));
        assert!(acct.period_elapsed(datetime!(2024-03-02 00:00 UTC), period));
    }

    #[test]
    fn test_usage_snapshot() {
        let acct = account(300);
        let usage = QuotaUsage::from_account(&acct);
        assert_eq!(usage.storage_headroom, 700);
        assert_eq!(usage.download_limit, 500);
    }
}
