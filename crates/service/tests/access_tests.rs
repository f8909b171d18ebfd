//! Access gate and lazy TTL lifecycle tests.

mod common;

use common::{payload, read_all, TestHost};
use stowage_core::{Error, FileId, OwnerId, Visibility};
use stowage_service::{AccessDecision, CompleteOptions, Denial};
use time::Duration;

fn public(ttl_hours: u32) -> CompleteOptions {
    CompleteOptions {
        ttl_hours,
        visibility: Visibility::Public,
    }
}

fn private(ttl_hours: u32) -> CompleteOptions {
    CompleteOptions {
        ttl_hours,
        visibility: Visibility::Private,
    }
}

#[tokio::test]
async fn test_private_file_is_owner_only() {
    let env = TestHost::new().await;
    let owner = OwnerId::new();
    let stranger = OwnerId::new();
    env.host.ensure_account(stranger).await.unwrap();

    let file = env.upload(owner, "a.bin", b"secret", 6, private(0)).await;

    let decision = env.host.check_read(file.file_id, Some(owner)).await.unwrap();
    assert!(decision.is_allowed());

    for requester in [Some(stranger), None] {
        let decision = env.host.check_read(file.file_id, requester).await.unwrap();
        assert!(matches!(decision, AccessDecision::Deny(Denial::Forbidden)));
    }
    assert!(matches!(
        env.host.open(file.file_id, Some(stranger)).await.map(|_| ()).unwrap_err(),
        Error::Forbidden(_)
    ));
    // Metadata is gated the same way as bytes.
    assert!(matches!(
        env.host.get_metadata(file.file_id, Some(stranger)).await.unwrap_err(),
        Error::Forbidden(_)
    ));
}

#[tokio::test]
async fn test_anonymous_read_of_public_file_is_unaccounted() {
    let env = TestHost::new().await;
    let owner = OwnerId::new();

    let data = payload(400);
    let file = env.upload(owner, "a.bin", &data, 200, public(0)).await;

    let (meta, stream) = env.host.open(file.file_id, None).await.unwrap();
    assert_eq!(read_all(stream).await, data);
    assert_eq!(meta.byte_size, 400);

    // The download registered on the file but charged no account.
    let meta = env.host.get_metadata(file.file_id, None).await.unwrap();
    assert_eq!(meta.download_count, 1);
    assert_eq!(env.host.usage(owner).await.unwrap().download_used, 0);
}

#[tokio::test]
async fn test_owner_reads_never_consume_download_quota() {
    let env = TestHost::new().await;
    let owner = OwnerId::new();
    env.host.ensure_account(owner).await.unwrap();
    env.host.set_limits(owner, 10_000, 100).await.unwrap();

    // Larger than the owner's own download ceiling.
    let file = env.upload(owner, "a.bin", &payload(500), 250, private(0)).await;

    env.host.open(file.file_id, Some(owner)).await.unwrap();
    env.host.open(file.file_id, Some(owner)).await.unwrap();
    assert_eq!(env.host.usage(owner).await.unwrap().download_used, 0);
    assert_eq!(
        env.host.get_metadata(file.file_id, Some(owner)).await.unwrap().download_count,
        2
    );
}

#[tokio::test]
async fn test_non_owner_read_is_charged() {
    let env = TestHost::new().await;
    let owner = OwnerId::new();
    let reader = OwnerId::new();

    let file = env.upload(owner, "a.bin", &payload(250), 125, public(0)).await;

    env.host.open(file.file_id, Some(reader)).await.unwrap();
    assert_eq!(env.host.usage(reader).await.unwrap().download_used, 250);
    assert_eq!(env.host.usage(owner).await.unwrap().download_used, 0);
}

#[tokio::test]
async fn test_check_read_reserves_without_charging() {
    let env = TestHost::new().await;
    let owner = OwnerId::new();
    let reader = OwnerId::new();
    env.host.ensure_account(reader).await.unwrap();
    env.host.set_limits(reader, 10_000, 300).await.unwrap();

    let file = env.upload(owner, "a.bin", &payload(200), 100, public(0)).await;

    // Checking repeatedly burns nothing.
    for _ in 0..5 {
        let decision = env.host.check_read(file.file_id, Some(reader)).await.unwrap();
        assert!(decision.is_allowed());
    }
    assert_eq!(env.host.usage(reader).await.unwrap().download_used, 0);

    let big = env.upload(owner, "b.bin", &payload(400), 200, public(0)).await;
    let decision = env.host.check_read(big.file_id, Some(reader)).await.unwrap();
    assert!(matches!(
        decision,
        AccessDecision::Deny(Denial::DownloadQuotaExceeded {
            used: 0,
            requested: 400,
            limit: 300
        })
    ));
}

#[tokio::test]
async fn test_expired_file_reads_gone_and_frees_quota() {
    let env = TestHost::new().await;
    let owner = OwnerId::new();

    let file = env.upload(owner, "a.bin", &payload(300), 150, public(2)).await;
    assert_eq!(env.host.usage(owner).await.unwrap().storage_used, 300);

    // Still live just inside the TTL.
    env.clock.advance(Duration::hours(1));
    env.host.open(file.file_id, None).await.unwrap();

    env.clock.advance(Duration::hours(2));
    let err = env.host.open(file.file_id, None).await.map(|_| ()).unwrap_err();
    assert!(matches!(err, Error::Gone(_)));

    // The first expired observation reaped it: quota freed, bytes queued
    // for deletion. Subsequent lookups hit the soft-deleted row.
    assert_eq!(env.host.usage(owner).await.unwrap().storage_used, 0);
    assert_eq!(env.reclaimer.reclaimed(), vec![file.location.clone()]);
    assert!(matches!(
        env.host.get_metadata(file.file_id, None).await.unwrap_err(),
        Error::NotFound(_)
    ));
}

#[tokio::test]
async fn test_zero_ttl_never_expires() {
    let env = TestHost::new().await;
    let owner = OwnerId::new();

    let file = env.upload(owner, "a.bin", b"keep", 4, public(0)).await;
    env.clock.advance(Duration::days(3650));
    env.host.open(file.file_id, None).await.unwrap();
}

#[tokio::test]
async fn test_listing_omits_and_reaps_expired_files() {
    let env = TestHost::new().await;
    let owner = OwnerId::new();

    let evergreen = env.upload(owner, "keep.bin", &payload(100), 50, private(0)).await;
    let doomed = env.upload(owner, "temp.bin", &payload(100), 50, private(1)).await;

    env.clock.advance(Duration::hours(2));
    let listed = env.host.list_files(owner).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].file_id, evergreen.file_id);

    assert_eq!(env.host.usage(owner).await.unwrap().storage_used, 100);
    assert_eq!(env.reclaimer.reclaimed(), vec![doomed.location.clone()]);
}

#[tokio::test]
async fn test_toggle_visibility_owner_only() {
    let env = TestHost::new().await;
    let owner = OwnerId::new();
    let stranger = OwnerId::new();

    let file = env.upload(owner, "a.bin", b"data", 4, private(0)).await;

    assert!(matches!(
        env.host
            .toggle_visibility(file.file_id, stranger)
            .await
            .unwrap_err(),
        Error::Forbidden(_)
    ));

    let now_public = env.host.toggle_visibility(file.file_id, owner).await.unwrap();
    assert_eq!(now_public, Visibility::Public);
    env.host.open(file.file_id, None).await.unwrap();

    let now_private = env.host.toggle_visibility(file.file_id, owner).await.unwrap();
    assert_eq!(now_private, Visibility::Private);
    assert!(matches!(
        env.host.open(file.file_id, None).await.map(|_| ()).unwrap_err(),
        Error::Forbidden(_)
    ));
}

#[tokio::test]
async fn test_unknown_file_denied_as_not_found() {
    let env = TestHost::new().await;
    let decision = env.host.check_read(FileId::new(), None).await.unwrap();
    assert!(matches!(decision, AccessDecision::Deny(Denial::NotFound)));
}

#[tokio::test]
async fn test_listing_is_newest_first() {
    let env = TestHost::new().await;
    let owner = OwnerId::new();

    env.upload(owner, "old.bin", b"1", 1, private(0)).await;
    env.clock.advance(Duration::minutes(5));
    env.upload(owner, "new.bin", b"2", 1, private(0)).await;

    let listed = env.host.list_files(owner).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].display_name, "new.bin");
    assert_eq!(listed[1].display_name, "old.bin");
}
