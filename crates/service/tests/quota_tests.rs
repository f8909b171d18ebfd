//! Storage and download ceiling tests, including the two-phase recheck.

mod common;

use common::{payload, TestHost};
use stowage_core::{Error, OwnerId};
use stowage_service::CompleteOptions;
use stowage_storage::ObjectStore;
use time::Duration;

async fn owner_with_limits(env: &TestHost, storage: u64, download: u64) -> OwnerId {
    let owner = OwnerId::new();
    env.host.ensure_account(owner).await.unwrap();
    env.host.set_limits(owner, storage, download).await.unwrap();
    owner
}

#[tokio::test]
async fn test_optimistic_check_rejects_at_start() {
    let env = TestHost::new().await;
    let owner = owner_with_limits(&env, 1_000, 10_000).await;

    env.upload(owner, "big.bin", &payload(900), 300, CompleteOptions::default())
        .await;

    let err = env
        .host
        .start_upload(owner, "more.bin", 150, 1)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::StorageQuotaExceeded {
            used: 900,
            requested: 150,
            limit: 1_000
        }
    ));

    // Exactly at the limit is allowed.
    env.host.start_upload(owner, "fit.bin", 100, 1).await.unwrap();

    // check_write mirrors the same optimistic comparison.
    env.host.check_write(owner, 100).await.unwrap();
    assert!(env.host.check_write(owner, 101).await.unwrap_err().is_quota_exceeded());
}

#[tokio::test]
async fn test_sequential_uploads_accumulate() {
    let env = TestHost::new().await;
    let owner = owner_with_limits(&env, 1_000, 10_000).await;

    env.upload(owner, "a.bin", &payload(800), 400, CompleteOptions::default())
        .await;
    for name in ["b.bin", "c.bin", "d.bin"] {
        env.upload(owner, name, &payload(50), 50, CompleteOptions::default())
            .await;
    }
    assert_eq!(env.host.usage(owner).await.unwrap().storage_used, 950);

    let err = env
        .host
        .start_upload(owner, "e.bin", 100, 1)
        .await
        .unwrap_err();
    assert!(err.is_quota_exceeded());
}

#[tokio::test]
async fn test_concurrent_completions_admit_exactly_one() {
    let env = TestHost::new().await;
    let owner = owner_with_limits(&env, 1_000, 10_000).await;

    // Both sessions pass the optimistic check; only one fits at commit.
    let first = env.start_chunked(owner, "a.bin", &payload(600), 300).await;
    let second = env.start_chunked(owner, "b.bin", &payload(600), 300).await;

    let (ra, rb) = tokio::join!(
        env.host.complete_upload(first),
        env.host.complete_upload(second)
    );

    let outcomes = [ra, rb];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = outcomes.iter().find(|r| r.is_err()).unwrap();
    assert!(matches!(
        loser.as_ref().unwrap_err(),
        Error::StorageQuotaExceeded { .. }
    ));

    // The ledger reflects the single admitted file, and the loser's
    // assembled bytes were discarded.
    assert_eq!(env.host.usage(owner).await.unwrap().storage_used, 600);
    assert_eq!(env.host.list_files(owner).await.unwrap().len(), 1);
    assert_eq!(env.storage.list("files/").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_many_concurrent_completions_respect_the_ceiling() {
    use futures::stream::{FuturesUnordered, StreamExt};

    let env = TestHost::new().await;
    let owner = owner_with_limits(&env, 1_000, 10_000).await;

    let mut sessions = Vec::new();
    for i in 0..4 {
        let name = format!("f{i}.bin");
        sessions.push(env.start_chunked(owner, &name, &payload(300), 150).await);
    }

    let mut completions: FuturesUnordered<_> = sessions
        .into_iter()
        .map(|session| env.host.complete_upload(session))
        .collect();

    let mut admitted = 0;
    let mut refused = 0;
    while let Some(result) = completions.next().await {
        match result {
            Ok(_) => admitted += 1,
            Err(e) => {
                assert!(e.is_quota_exceeded());
                refused += 1;
            }
        }
    }

    // 3 x 300 fits under 1000; a fourth never does.
    assert_eq!(admitted, 3);
    assert_eq!(refused, 1);
    assert_eq!(env.host.usage(owner).await.unwrap().storage_used, 900);
    assert_eq!(env.storage.list("files/").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_delete_releases_storage() {
    let env = TestHost::new().await;
    let owner = owner_with_limits(&env, 1_000, 10_000).await;

    let file = env
        .upload(owner, "a.bin", &payload(700), 350, CompleteOptions::default())
        .await;
    assert_eq!(env.host.usage(owner).await.unwrap().storage_used, 700);

    env.host.delete_file(file.file_id, owner).await.unwrap();
    assert_eq!(env.host.usage(owner).await.unwrap().storage_used, 0);
    assert_eq!(env.reclaimer.reclaimed(), vec![file.location.clone()]);
    assert!(env.storage.list("files/").await.unwrap().is_empty());

    // Freed headroom is immediately usable.
    env.upload(owner, "b.bin", &payload(900), 300, CompleteOptions::default())
        .await;
}

#[tokio::test]
async fn test_delete_is_owner_only_and_single_shot() {
    let env = TestHost::new().await;
    let owner = OwnerId::new();
    let stranger = OwnerId::new();

    let file = env
        .upload(owner, "a.bin", b"hello", 5, CompleteOptions::default())
        .await;

    assert!(matches!(
        env.host.delete_file(file.file_id, stranger).await.unwrap_err(),
        Error::Forbidden(_)
    ));

    env.host.delete_file(file.file_id, owner).await.unwrap();
    // A soft-deleted file reads as missing, also for its owner.
    assert!(matches!(
        env.host.delete_file(file.file_id, owner).await.unwrap_err(),
        Error::NotFound(_)
    ));
    assert!(matches!(
        env.host.get_metadata(file.file_id, Some(owner)).await.unwrap_err(),
        Error::NotFound(_)
    ));
}

#[tokio::test]
async fn test_download_ceiling_and_period_reset() {
    let env = TestHost::new().await;
    let owner = OwnerId::new();
    let reader = owner_with_limits(&env, 10_000, 1_000).await;

    let opts = CompleteOptions {
        ttl_hours: 0,
        visibility: stowage_core::Visibility::Public,
    };
    let file = env.upload(owner, "a.bin", &payload(600), 300, opts).await;

    env.host.open(file.file_id, Some(reader)).await.unwrap();
    assert_eq!(env.host.usage(reader).await.unwrap().download_used, 600);

    // 600 used of 1000: the same file no longer fits.
    let err = env.host.open(file.file_id, Some(reader)).await.map(|_| ()).unwrap_err();
    assert!(matches!(
        err,
        Error::DownloadQuotaExceeded {
            used: 600,
            requested: 600,
            limit: 1_000
        }
    ));

    // The counter zeroes once the period rolls over.
    env.clock.advance(Duration::hours(25));
    env.host.open(file.file_id, Some(reader)).await.unwrap();
    assert_eq!(env.host.usage(reader).await.unwrap().download_used, 600);
}

#[tokio::test]
async fn test_usage_snapshot_shape() {
    let env = TestHost::new().await;
    let owner = owner_with_limits(&env, 1_000, 2_000).await;

    env.upload(owner, "a.bin", &payload(300), 100, CompleteOptions::default())
        .await;

    let usage = env.host.usage(owner).await.unwrap();
    assert_eq!(usage.owner_id, owner);
    assert_eq!(usage.storage_limit, 1_000);
    assert_eq!(usage.storage_used, 300);
    assert_eq!(usage.storage_headroom, 700);
    assert_eq!(usage.download_limit, 2_000);
    assert_eq!(usage.download_used, 0);
    assert_eq!(usage.period_anchor, common::T0);
}

#[tokio::test]
async fn test_unknown_account_usage_is_not_found() {
    let env = TestHost::new().await;
    let err = env.host.usage(OwnerId::new()).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}
