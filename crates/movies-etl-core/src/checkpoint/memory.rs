//! In-memory [`StateStorage`] for tests and dry runs.
//!
//! Clones share the same map, so a test can hand one clone to a
//! [`Checkpoint`](super::Checkpoint) and inspect the state through another.

use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;

use super::{StateMap, StateStorage};

#[derive(Clone, Default)]
pub struct MemoryStorage {
    state: Arc<RwLock<StateMap>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from pre-populated state.
    pub fn with_state<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let state = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// A copy of the current state.
    pub fn snapshot(&self) -> StateMap {
        self.state
            .read()
            .map(|state| state.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl StateStorage for MemoryStorage {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn save_state(&self, state: &StateMap) -> Result<()> {
        let mut guard = self
            .state
            .write()
            .map_err(|_| anyhow::anyhow!("memory state lock poisoned"))?;
        *guard = state.clone();
        Ok(())
    }

    async fn retrieve_state(&self) -> Result<StateMap> {
        let guard = self
            .state
            .read()
            .map_err(|_| anyhow::anyhow!("memory state lock poisoned"))?;
        Ok(guard.clone())
    }
}
