//! Checkpoint backend selection.

use movies_etl_core::checkpoint::{Checkpoint, StateStorage};

use crate::config::CheckpointConfig;
use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::state_file::JsonFileStorage;
use crate::state_redis::RedisStorage;

/// Open the configured backend and wrap it in a [`Checkpoint`].
///
/// Config validation guarantees `redis_url` is set for the Redis backend.
pub async fn open(config: &CheckpointConfig, retry: &RetryPolicy) -> Result<Checkpoint> {
    let storage: Box<dyn StateStorage> = match (config.backend.as_str(), &config.redis_url) {
        ("redis", Some(url)) => {
            Box::new(RedisStorage::connect(url, config.redis_key.clone(), retry).await?)
        }
        _ => Box::new(JsonFileStorage::new(&config.path)),
    };

    tracing::debug!(backend = storage.backend(), key = %config.key, "checkpoint opened");
    Ok(Checkpoint::new(storage, config.key.clone()))
}
