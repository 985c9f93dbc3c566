//! Checkpoint abstraction.
//!
//! A [`StateStorage`] persists a small string map (the local JSON file and
//! the Redis hash implement it in the `movies-etl` crate; [`memory`] holds an
//! in-process one for tests). [`Checkpoint`] layers the watermark contract on
//! top of a single key of that map:
//!
//! | Method | Behavior |
//! |--------|----------|
//! | [`retrieve`](Checkpoint::retrieve) | Stored watermark, or the sentinel (which is then stored) |
//! | [`persist`](Checkpoint::persist) | Store a candidate if it moves the watermark forward |
//!
//! Missing or garbage state reads as "no watermark yet", which forces
//! reprocessing instead of skipping data. A backend that cannot be read at
//! all is different: the stored value may be perfectly good, so it is never
//! overwritten on the strength of a failed read.

pub mod memory;

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::watermark::Watermark;

/// The persisted state: key → string value.
pub type StateMap = BTreeMap<String, String>;

/// A durable backend for the checkpoint state map.
#[async_trait]
pub trait StateStorage: Send + Sync {
    /// Short backend label for logs and status output (e.g. `"file"`).
    fn backend(&self) -> &str;

    /// Replace the stored state with `state`.
    async fn save_state(&self, state: &StateMap) -> Result<()>;

    /// Load the stored state.
    ///
    /// Missing or unparseable state is `Ok` with an empty map. `Err` means
    /// the backend could not be read and says nothing about what it holds.
    async fn retrieve_state(&self) -> Result<StateMap>;
}

/// The watermark stored under one key of a [`StateStorage`].
pub struct Checkpoint {
    storage: Box<dyn StateStorage>,
    key: String,
}

impl Checkpoint {
    pub fn new(storage: Box<dyn StateStorage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn backend(&self) -> &str {
        self.storage.backend()
    }

    /// The stored watermark, without initializing anything.
    pub async fn stored(&self) -> Result<Option<Watermark>> {
        let state = self.storage.retrieve_state().await?;
        Ok(state.get(&self.key).and_then(|raw| raw.parse().ok()))
    }

    /// The current watermark.
    ///
    /// When nothing parseable is stored, the sentinel is written back so
    /// later reads are stable, and returned. A failure to write it is logged
    /// and otherwise ignored. When the backend cannot be read, the sentinel
    /// is returned for this call only and storage is left untouched.
    pub async fn retrieve(&self) -> Watermark {
        let mut state = match self.storage.retrieve_state().await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(
                    key = %self.key,
                    backend = self.backend(),
                    error = %e,
                    "checkpoint unreadable, starting from the sentinel without storing it"
                );
                return Watermark::sentinel();
            }
        };

        match state.get(&self.key).map(|raw| (raw, raw.parse::<Watermark>())) {
            Some((_, Ok(watermark))) => return watermark,
            Some((raw, Err(e))) => tracing::warn!(
                key = %self.key,
                value = %raw,
                error = %e,
                "stored watermark is unparseable, starting from the sentinel"
            ),
            None => tracing::warn!(
                key = %self.key,
                backend = self.backend(),
                "no stored watermark, starting from the sentinel"
            ),
        }

        let sentinel = Watermark::sentinel();
        state.insert(self.key.clone(), sentinel.to_string());
        if let Err(e) = self.storage.save_state(&state).await {
            tracing::warn!(error = %e, "failed to store the sentinel watermark");
        }
        sentinel
    }

    /// Store `candidate` if it is newer than the stored watermark.
    ///
    /// Must only be called once the documents the candidate covers have been
    /// written. Returns the watermark in effect afterwards. Fails without
    /// writing when the stored value cannot be read, since it may be newer.
    pub async fn persist(&self, candidate: Watermark) -> Result<Watermark> {
        let mut state = self
            .storage
            .retrieve_state()
            .await
            .context("failed to read the checkpoint before advancing it")?;

        if let Some(current) = state.get(&self.key).and_then(|raw| raw.parse().ok()) {
            if candidate <= current {
                tracing::debug!(
                    current = %current,
                    candidate = %candidate,
                    "watermark unchanged"
                );
                return Ok(current);
            }
        }

        state.insert(self.key.clone(), candidate.to_string());
        self.storage.save_state(&state).await?;
        tracing::info!(watermark = %candidate, backend = self.backend(), "watermark advanced");
        Ok(candidate)
    }
}
