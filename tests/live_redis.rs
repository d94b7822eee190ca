//! Store tests against a running Redis server.
//!
//! - Marked `#[ignore]`; run with `cargo test -- --ignored`.
//! - Reads the server URL from `POPCACHE_TEST_REDIS_URL` and flushes the
//!   selected database, so point it at a disposable instance.

use std::{env, sync::Arc, time::Duration};

use popcache::{
    cache::{
        CONDITIONAL_INCR_NUM_KEYS, CONDITIONAL_INCR_SCRIPT, CONDITIONAL_INCR_SCRIPT_NAME,
        CachedRange, ScoreKey, SortedSetStore, script_sha1,
    },
    config::RedisSettings,
    domain::{entities::ScoreEntry, types::ItemType},
    infra::redis_store::RedisStore,
};

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

async fn connect() -> TestResult<SortedSetStore> {
    let url = env::var("POPCACHE_TEST_REDIS_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string());

    let client = redis::Client::open(url.as_str())?;
    let mut conn = client.get_multiplexed_async_connection().await?;
    let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
    let _: () = redis::cmd("SCRIPT")
        .arg("FLUSH")
        .query_async(&mut conn)
        .await?;

    let store = RedisStore::connect(&RedisSettings {
        url,
        connect_retry: Duration::from_secs(2),
    })
    .await?;
    Ok(SortedSetStore::new(Arc::new(store)))
}

#[tokio::test]
#[ignore]
async fn live_script_registers_under_its_digest() -> TestResult<()> {
    let store = connect().await?;

    let handle = store
        .script_registry()
        .register(
            CONDITIONAL_INCR_SCRIPT_NAME,
            CONDITIONAL_INCR_SCRIPT,
            CONDITIONAL_INCR_NUM_KEYS,
        )
        .await?;

    assert_eq!(handle.sha(), script_sha1(CONDITIONAL_INCR_SCRIPT));
    Ok(())
}

#[tokio::test]
#[ignore]
async fn live_increment_only_touches_existing_sets() -> TestResult<()> {
    let store = connect().await?;
    let handle = store
        .script_registry()
        .register(
            CONDITIONAL_INCR_SCRIPT_NAME,
            CONDITIONAL_INCR_SCRIPT,
            CONDITIONAL_INCR_NUM_KEYS,
        )
        .await?;
    let key = ScoreKey::derive("LIKE", ItemType::Assets, "live-asset");

    assert_eq!(store.conditional_increment(&handle, &key, "c1", 1).await?, None);
    assert_eq!(
        store.range_desc_by_score(&key, 10, 0).await?,
        CachedRange::Absent
    );

    store
        .bulk_set(&key, &[ScoreEntry::new("c1", 2), ScoreEntry::new("c2", 1)])
        .await?;
    assert_eq!(
        store.conditional_increment(&handle, &key, "c2", 3).await?,
        Some(4)
    );

    assert_eq!(
        store.range_desc_by_score(&key, 10, 0).await?,
        CachedRange::Present(vec![ScoreEntry::new("c2", 4), ScoreEntry::new("c1", 2)])
    );
    assert_eq!(
        store.range_desc_by_score(&key, 10, 5).await?,
        CachedRange::Present(Vec::new())
    );
    Ok(())
}
