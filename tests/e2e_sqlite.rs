// these tests use #[serial] to run sequentially because setup_db() recreates
// the database each time. without serial, parallel tests would interfere
// with each other's data.

//! End-to-end tests for the session state store over `SQLite`.
//!
//! These tests use an in-memory `SQLite` database.
//! Run with: `cargo test --features sqlx_sqlite --test e2e_sqlite`

#![cfg(feature = "sqlx_sqlite")]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{Duration, Utc};
use serial_test::serial;
use sessionlock::sqlite::{SqliteSessionRecordRepository, create_store, migrations};
use sessionlock::{
    FetchResult, SessionData, SessionFlags, SessionItems, SessionRecord,
    SessionRecordRepository, SessionStateStore, StoreConfig, WriteData, codec,
};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

async fn setup_db() -> SqlitePool {
    // Use in-memory database for testing
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to connect to in-memory SQLite database");

    migrations::run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

async fn setup_store() -> SessionStateStore<SqliteSessionRecordRepository> {
    create_store(setup_db().await, StoreConfig::default()).expect("Failed to create store")
}

fn tt_items() -> SessionItems {
    [("TT", "TT")].into_iter().collect()
}

#[tokio::test]
#[serial]
async fn test_migrations_are_idempotent() {
    let pool = setup_db().await;
    migrations::run(&pool)
        .await
        .expect("Second migration run failed");
}

#[tokio::test]
#[serial]
async fn test_uninitialized_write_then_read_only() {
    let store = setup_store().await;

    store
        .create_uninitialized("s1", 20)
        .await
        .expect("Failed to create session");

    let FetchResult::Found {
        data,
        lock_token,
        flags,
    } = store.fetch("s1", true).await.expect("Failed to fetch")
    else {
        panic!("expected session to be found");
    };
    assert!(data.items.is_empty());
    assert_eq!(data.timeout_minutes, 20);
    assert_eq!(lock_token, 1);
    assert_eq!(flags, SessionFlags::Uninitialized);

    store
        .release(
            "s1",
            lock_token,
            Some(WriteData {
                items: tt_items(),
                timeout_minutes: 20,
                is_new: false,
            }),
        )
        .await
        .expect("Failed to release");

    let FetchResult::Found { data, .. } = store.fetch("s1", false).await.expect("Failed to fetch")
    else {
        panic!("expected session to be found");
    };
    assert_eq!(data.items, tt_items());

    let record = store
        .repository()
        .find("s1")
        .await
        .expect("Failed to find")
        .expect("Record not found");
    assert!(!record.locked);
    assert_eq!(record.lock_id, 1);
    assert_eq!(record.flags, SessionFlags::None);
    assert_eq!(codec::decode(&record.payload).unwrap(), tt_items());
}

#[tokio::test]
#[serial]
async fn test_second_exclusive_fetch_reports_lock() {
    let store = setup_store().await;
    store.create_uninitialized("s1", 20).await.unwrap();

    let first = store.fetch("s1", true).await.unwrap();
    store.release("s1", 1, None).await.unwrap();

    assert!(matches!(first, FetchResult::Found { lock_token: 1, .. }));

    let second = store.fetch("s1", true).await.unwrap();
    assert!(matches!(second, FetchResult::Found { lock_token: 2, .. }));

    let third = store.fetch("s1", true).await.unwrap();
    let FetchResult::LockedByOther {
        lock_age,
        lock_token,
    } = third
    else {
        panic!("expected contention, got {third:?}");
    };
    assert_eq!(lock_token, 2);
    assert!(lock_age >= Duration::zero());
}

#[tokio::test]
#[serial]
async fn test_lock_is_shared_between_store_instances() {
    let pool = setup_db().await;
    let first = create_store(pool.clone(), StoreConfig::default()).unwrap();
    let second = create_store(pool, StoreConfig::default()).unwrap();

    first.create_uninitialized("shared", 20).await.unwrap();

    assert!(matches!(
        first.fetch("shared", true).await.unwrap(),
        FetchResult::Found { lock_token: 1, .. }
    ));
    assert!(second.fetch("shared", true).await.unwrap().is_locked());

    first.release("shared", 1, None).await.unwrap();
    assert!(matches!(
        second.fetch("shared", true).await.unwrap(),
        FetchResult::Found { lock_token: 2, .. }
    ));
}

#[tokio::test]
#[serial]
async fn test_expired_session_is_reaped() {
    let store = setup_store().await;
    let now = Utc::now();

    store
        .repository()
        .create_uninitialized(SessionRecord::uninitialized(
            "s1",
            20,
            now - Duration::minutes(20),
            now - Duration::seconds(1),
        ))
        .await
        .unwrap();

    let result = store.fetch("s1", false).await.unwrap();
    assert!(result.is_absent());

    let found = store.repository().find("s1").await.unwrap();
    assert!(found.is_none());
}

#[tokio::test]
#[serial]
async fn test_expired_locked_session_is_reaped() {
    let store = setup_store().await;
    let now = Utc::now();

    store
        .repository()
        .create_uninitialized(SessionRecord::uninitialized(
            "stuck",
            20,
            now - Duration::hours(1),
            now - Duration::minutes(1),
        ))
        .await
        .unwrap();
    assert!(
        store
            .repository()
            .mark_locked("stuck", 0, 1, now - Duration::minutes(30))
            .await
            .unwrap()
    );

    assert!(store.fetch("stuck", true).await.unwrap().is_absent());
    assert!(store.repository().find("stuck").await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn test_remove_missing_is_benign() {
    let store = setup_store().await;

    store
        .remove("missing-id")
        .await
        .expect("Removing a missing session should not fail");
    assert!(store.fetch("missing-id", false).await.unwrap().is_absent());
}

#[tokio::test]
#[serial]
async fn test_remove_deletes_locked_session() {
    let store = setup_store().await;
    store.create_uninitialized("s1", 20).await.unwrap();
    store.fetch("s1", true).await.unwrap();

    store.remove("s1").await.unwrap();

    assert!(store.repository().find("s1").await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn test_new_session_write() {
    let store = setup_store().await;

    let mut data = SessionData::new(30);
    data.items.insert("user_id", 7_i64);
    data.items.insert("name", "Zoë");

    store
        .release("fresh", 0, Some(WriteData::new_session(data.clone())))
        .await
        .unwrap();

    let FetchResult::Found {
        data: fetched,
        lock_token,
        flags,
    } = store.fetch("fresh", true).await.unwrap()
    else {
        panic!("expected session to be found");
    };
    assert_eq!(fetched, data);
    assert_eq!(lock_token, 1);
    assert_eq!(flags, SessionFlags::None);
}

#[tokio::test]
#[serial]
async fn test_release_only_and_reset_timeout_extend_expiry() {
    let pool = setup_db().await;
    let store = create_store(pool, StoreConfig::from_minutes(60).unwrap()).unwrap();
    store.create_uninitialized("s1", 1).await.unwrap();
    store.fetch("s1", true).await.unwrap();

    let before = Utc::now();
    store.release("s1", 1, None).await.unwrap();
    let record = store.repository().find("s1").await.unwrap().unwrap();
    assert!(!record.locked);
    assert!(record.expires_at >= before + Duration::minutes(60));

    let before = Utc::now();
    store.reset_timeout("s1").await.unwrap();
    let record = store.repository().find("s1").await.unwrap().unwrap();
    assert!(record.expires_at >= before + Duration::minutes(60));

    store.reset_timeout("missing").await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_read_only_fetch_clears_uninitialized_flag() {
    let store = setup_store().await;
    store.create_uninitialized("s1", 20).await.unwrap();

    let FetchResult::Found { flags, .. } = store.fetch("s1", false).await.unwrap() else {
        panic!("expected session to be found");
    };
    assert_eq!(flags, SessionFlags::Uninitialized);

    let record = store.repository().find("s1").await.unwrap().unwrap();
    assert_eq!(record.flags, SessionFlags::None);
    assert!(!record.locked);
}

#[tokio::test]
#[serial]
async fn test_prune_expired() {
    let store = setup_store().await;
    let now = Utc::now();

    store
        .repository()
        .create_uninitialized(SessionRecord::uninitialized(
            "old",
            20,
            now - Duration::hours(2),
            now - Duration::hours(1),
        ))
        .await
        .unwrap();
    store.create_uninitialized("live", 20).await.unwrap();

    let pruned = store.repository().prune_expired(Utc::now()).await.unwrap();
    assert_eq!(pruned, 1);
    assert!(store.repository().find("live").await.unwrap().is_some());
}

#[tokio::test]
#[serial]
async fn test_stale_holder_cannot_release_broken_lock() {
    let store = setup_store().await;
    store.create_uninitialized("s1", 20).await.unwrap();

    assert!(matches!(
        store.fetch("s1", true).await.unwrap(),
        FetchResult::Found { lock_token: 1, .. }
    ));
    let FetchResult::LockedByOther { lock_token, .. } = store.fetch("s1", true).await.unwrap()
    else {
        panic!("expected contention");
    };
    store.release("s1", lock_token, None).await.unwrap();
    assert!(matches!(
        store.fetch("s1", true).await.unwrap(),
        FetchResult::Found { lock_token: 2, .. }
    ));

    store
        .release(
            "s1",
            1,
            Some(WriteData {
                items: tt_items(),
                timeout_minutes: 20,
                is_new: false,
            }),
        )
        .await
        .unwrap();
    store.release("s1", 1, None).await.unwrap();

    let record = store.repository().find("s1").await.unwrap().unwrap();
    assert!(record.locked);
    assert_eq!(record.lock_id, 2);
    assert!(record.payload.is_empty());
    assert!(matches!(
        store.fetch("s1", true).await.unwrap(),
        FetchResult::LockedByOther { lock_token: 2, .. }
    ));

    // a new-session insert never takes over a held record either
    store
        .release("s1", 0, Some(WriteData::new_session(SessionData::new(20))))
        .await
        .unwrap();
    let record = store.repository().find("s1").await.unwrap().unwrap();
    assert!(record.locked);
    assert_eq!(record.lock_id, 2);
}
