//! Mutual exclusion under concurrent exclusive fetches.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use sessionlock::{
    FetchResult, InMemorySessionRecordRepository, SessionRecordRepository, SessionStateStore,
    StoreConfig, WriteData,
};

const CALLERS: usize = 32;

async fn race_for_lock<R>(store: SessionStateStore<R>, session_id: &'static str) -> Vec<FetchResult>
where
    R: SessionRecordRepository + Clone + 'static,
{
    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.fetch(session_id, true).await.unwrap() })
        })
        .collect();

    let mut results = Vec::with_capacity(CALLERS);
    for handle in handles {
        results.push(handle.await.expect("fetch task panicked"));
    }
    results
}

fn winners(results: &[FetchResult]) -> usize {
    results
        .iter()
        .filter(|r| matches!(r, FetchResult::Found { .. }))
        .count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exactly_one_exclusive_holder() {
    let store =
        SessionStateStore::new(InMemorySessionRecordRepository::new(), StoreConfig::default())
            .unwrap();
    store.create_uninitialized("hot", 20).await.unwrap();

    let results = race_for_lock(store.clone(), "hot").await;

    assert_eq!(winners(&results), 1);
    assert!(
        results
            .iter()
            .all(|r| matches!(r, FetchResult::Found { .. } | FetchResult::LockedByOther { .. }))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_each_release_admits_one_new_holder() {
    let store =
        SessionStateStore::new(InMemorySessionRecordRepository::new(), StoreConfig::default())
            .unwrap();
    store.create_uninitialized("hot", 20).await.unwrap();

    let mut previous_token = 0;
    for round in 1..=3_i64 {
        let results = race_for_lock(store.clone(), "hot").await;
        assert_eq!(winners(&results), 1);

        let (data, lock_token) = results
            .into_iter()
            .find_map(|r| match r {
                FetchResult::Found {
                    data, lock_token, ..
                } => Some((data, lock_token)),
                _ => None,
            })
            .unwrap();
        assert!(lock_token > previous_token);
        previous_token = lock_token;

        let mut items = data.items;
        items.insert("round", round);
        store
            .release(
                "hot",
                lock_token,
                Some(WriteData {
                    items,
                    timeout_minutes: data.timeout_minutes,
                    is_new: false,
                }),
            )
            .await
            .unwrap();
    }

    let FetchResult::Found { data, .. } = store.fetch("hot", false).await.unwrap() else {
        panic!("expected session to be found");
    };
    assert_eq!(data.items.get("round").and_then(|v| v.as_i64()), Some(3));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_sessions_do_not_contend() {
    let store =
        SessionStateStore::new(InMemorySessionRecordRepository::new(), StoreConfig::default())
            .unwrap();

    const IDS: [&str; 8] = ["a", "b", "c", "d", "e", "f", "g", "h"];
    for id in IDS {
        store.create_uninitialized(id, 20).await.unwrap();
    }

    let handles: Vec<_> = IDS
        .iter()
        .map(|&id| {
            let store = store.clone();
            tokio::spawn(async move { store.fetch(id, true).await.unwrap() })
        })
        .collect();

    for handle in handles {
        let result = handle.await.unwrap();
        assert!(matches!(result, FetchResult::Found { lock_token: 1, .. }));
    }
}

#[cfg(feature = "sqlx_sqlite")]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exactly_one_exclusive_holder_sqlite() {
    use sessionlock::sqlite::{create_store, migrations};
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    // a file database so several pooled connections really race
    let path = std::env::temp_dir().join(format!(
        "sessionlock_concurrency_{}.db",
        std::process::id()
    ));
    let _ = std::fs::remove_file(&path);
    let options = SqliteConnectOptions::new()
        .filename(&path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .unwrap();
    migrations::run(&pool).await.unwrap();

    let store = create_store(pool.clone(), StoreConfig::default()).unwrap();
    store.create_uninitialized("hot", 20).await.unwrap();

    let results = race_for_lock(store, "hot").await;
    assert_eq!(winners(&results), 1);

    pool.close().await;
    let _ = std::fs::remove_file(&path);
}
