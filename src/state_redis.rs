//! Redis hash checkpoint backend.
//!
//! The state map lives in one hash. Saving replaces the hash inside a
//! `MULTI` block; an empty map deletes it. A failed read is an error, which
//! the checkpoint turns into "start from the sentinel" without overwriting
//! the hash.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;

use movies_etl_core::checkpoint::{StateMap, StateStorage};

use crate::error::SyncError;
use crate::retry::RetryPolicy;

pub struct RedisStorage {
    connection: ConnectionManager,
    key: String,
}

impl RedisStorage {
    /// Connect to `url`, retrying while Redis is unreachable.
    ///
    /// The connection manager makes a single attempt per call; `retry` owns
    /// the backoff.
    pub async fn connect(
        url: &str,
        key: impl Into<String>,
        retry: &RetryPolicy,
    ) -> crate::error::Result<Self> {
        let client = redis::Client::open(url)?;
        let connection = retry
            .run("redis connect", SyncError::is_transient, || {
                let client = client.clone();
                async move {
                    let config = ConnectionManagerConfig::new().set_number_of_retries(0);
                    ConnectionManager::new_with_config(client, config)
                        .await
                        .map_err(SyncError::from)
                }
            })
            .await?;

        let key = key.into();
        tracing::info!(key = %key, "connected to redis");
        Ok(Self { connection, key })
    }
}

#[async_trait]
impl StateStorage for RedisStorage {
    fn backend(&self) -> &str {
        "redis"
    }

    async fn save_state(&self, state: &StateMap) -> Result<()> {
        let mut con = self.connection.clone();
        if state.is_empty() {
            con.del::<_, ()>(&self.key).await?;
            return Ok(());
        }

        let items: Vec<(&str, &str)> = state
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let _: () = redis::pipe()
            .atomic()
            .del(&self.key)
            .ignore()
            .hset_multiple(&self.key, &items)
            .ignore()
            .query_async(&mut con)
            .await?;
        Ok(())
    }

    async fn retrieve_state(&self) -> Result<StateMap> {
        let mut con = self.connection.clone();
        let map: HashMap<String, String> = con
            .hgetall(&self.key)
            .await
            .with_context(|| format!("Failed to read redis hash '{}'", self.key))?;
        Ok(map.into_iter().collect())
    }
}
