mod support;

use std::time::Duration;

use movies_etl::error::SyncError;
use movies_etl::state_redis::RedisStorage;
use movies_etl_core::checkpoint::{Checkpoint, StateMap, StateStorage};
use movies_etl_core::Watermark;

use support::fake_redis::FakeRedis;
use support::{fast_retry, KEY};

const HASH: &str = "movies_etl:state";
const STORED: &str = "2022-01-01T00:00:00.000000+00:00";

fn wm(s: &str) -> Watermark {
    s.parse().unwrap()
}

async fn storage(redis: &FakeRedis) -> RedisStorage {
    RedisStorage::connect(&redis.url, HASH, &fast_retry(Some(3)))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_connect_gives_up_after_max_attempts() {
    // Reserve a port, then free it so nothing listens there.
    let addr = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();

    let err = RedisStorage::connect(&format!("redis://{}/", addr), HASH, &fast_retry(Some(2)))
        .await
        .err()
        .unwrap();

    assert!(matches!(
        err,
        SyncError::RetriesExhausted { ref operation, attempts: 2, .. } if operation == "redis connect"
    ));
}

#[tokio::test]
async fn test_connect_waits_for_redis_to_come_up() {
    let addr = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();
    let starter = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        FakeRedis::start_on(addr).await
    });

    let storage = RedisStorage::connect(&format!("redis://{}/", addr), HASH, &fast_retry(None))
        .await
        .unwrap();
    let redis = starter.await.unwrap();

    assert!(storage.retrieve_state().await.unwrap().is_empty());
    assert!(redis.commands().contains(&"HGETALL".to_string()));
}

#[tokio::test]
async fn test_save_replaces_hash_atomically() {
    let redis = FakeRedis::start().await;
    redis.set_hash(HASH, &[("stale", "value"), (KEY, STORED)]);
    let storage = storage(&redis).await;

    let mut state = StateMap::new();
    state.insert(KEY.to_string(), "2022-02-01T00:00:00.000000+00:00".to_string());
    storage.save_state(&state).await.unwrap();

    assert_eq!(redis.hash(HASH), Some(state.clone()));
    assert_eq!(redis.commands(), ["MULTI", "DEL", "HMSET", "EXEC"]);
    assert_eq!(storage.retrieve_state().await.unwrap(), state);
}

#[tokio::test]
async fn test_saving_empty_state_deletes_hash() {
    let redis = FakeRedis::start().await;
    redis.set_hash(HASH, &[(KEY, STORED)]);
    let storage = storage(&redis).await;

    storage.save_state(&StateMap::new()).await.unwrap();

    assert_eq!(redis.hash(HASH), None);
    assert_eq!(redis.commands(), ["DEL"]);
}

#[tokio::test]
async fn test_checkpoint_round_trip_over_redis() {
    let redis = FakeRedis::start().await;
    let checkpoint = Checkpoint::new(Box::new(storage(&redis).await), KEY);

    assert_eq!(checkpoint.retrieve().await, Watermark::sentinel());
    assert_eq!(
        redis.hash(HASH).unwrap().get(KEY).map(String::as_str),
        Some("2021-01-01T00:00:00.000001+00:00")
    );

    checkpoint.persist(wm(STORED)).await.unwrap();
    assert_eq!(checkpoint.retrieve().await, wm(STORED));
    assert_eq!(checkpoint.backend(), "redis");
}

#[tokio::test]
async fn test_failed_read_leaves_stored_watermark_alone() {
    let redis = FakeRedis::start().await;
    redis.set_hash(HASH, &[(KEY, STORED)]);
    let checkpoint = Checkpoint::new(Box::new(storage(&redis).await), KEY);

    redis.fail_reads(true);
    assert_eq!(checkpoint.retrieve().await, Watermark::sentinel());
    assert!(checkpoint.stored().await.is_err());
    assert!(checkpoint
        .persist(wm("2021-06-01T12:00:00Z"))
        .await
        .is_err());
    assert_eq!(
        redis.hash(HASH).unwrap().get(KEY).map(String::as_str),
        Some(STORED)
    );
    assert!(!redis.commands().iter().any(|c| c == "HMSET" || c == "DEL"));

    redis.fail_reads(false);
    assert_eq!(checkpoint.retrieve().await, wm(STORED));
}
