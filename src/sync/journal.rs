//! Persistent record of aggregates changed since their last successful push.
//!
//! Each mark bumps a revision number. A sync acknowledges the revision it pushed, so a
//! write landing while that push is in flight keeps the key pending for the next run.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::codec;
use crate::error::Result;
use crate::repository::keys;
use crate::storage::{KeyValueStore, Namespace};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JournalState {
    #[serde(default)]
    next_revision: u64,
    #[serde(default)]
    pending: BTreeMap<String, u64>,
}

/// Pending-change journal stored under `sync_pending`
pub struct ChangeJournal {
    store: Arc<dyn KeyValueStore>,
    lock: Mutex<()>,
}

impl ChangeJournal {
    /// Create a journal persisted in `store`
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    /// Mark `key` as changed locally
    pub async fn mark(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut state = self.read().await?;
        state.next_revision += 1;
        let revision = state.next_revision;
        state.pending.insert(key.to_string(), revision);
        self.write(&state).await
    }

    /// Pending keys with the revision each was last marked at
    pub async fn snapshot(&self) -> Result<BTreeMap<String, u64>> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.pending)
    }

    /// Pending keys, sorted
    pub async fn pending_keys(&self) -> Result<Vec<String>> {
        Ok(self.snapshot().await?.into_keys().collect())
    }

    /// Clear `key` if it has not been marked again since `revision`.
    ///
    /// Returns whether the key was cleared.
    pub async fn acknowledge(&self, key: &str, revision: u64) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut state = self.read().await?;
        if state.pending.get(key) != Some(&revision) {
            return Ok(false);
        }
        state.pending.remove(key);
        self.write(&state).await?;
        Ok(true)
    }

    async fn read(&self) -> Result<JournalState> {
        let Some(raw) = self.store.get(Namespace::Standard, keys::SYNC_PENDING).await? else {
            return Ok(JournalState::default());
        };

        match codec::decode::<JournalState>(keys::SYNC_PENDING, &raw) {
            Ok(state) => Ok(state),
            Err(e) => {
                // Losing track of what changed would silently skip pushes; resend everything.
                warn!(error = %e, "sync journal is malformed, marking every aggregate pending");
                let mut state = JournalState::default();
                for key in keys::SYNCED_AGGREGATES {
                    state.next_revision += 1;
                    state.pending.insert(key.to_string(), state.next_revision);
                }
                Ok(state)
            },
        }
    }

    async fn write(&self, state: &JournalState) -> Result<()> {
        let raw = codec::encode(state)?;
        self.store.set(Namespace::Standard, keys::SYNC_PENDING, &raw).await
    }
}
