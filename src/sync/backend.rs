use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Result, StoreError};

/// Destination for locally changed aggregates.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Upload the full blob stored under `key`
    async fn push(&self, key: &str, blob: &str) -> Result<()>;
}

/// Stand-in backend that keeps pushed blobs in memory after a fixed latency.
#[derive(Default)]
pub struct SimulatedBackend {
    latency: Duration,
    received: RwLock<HashMap<String, String>>,
    failures_remaining: AtomicUsize,
}

impl SimulatedBackend {
    /// Create a backend answering after `latency`
    #[must_use]
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Make the next `count` pushes fail
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Last blob received for `key`
    pub async fn received(&self, key: &str) -> Option<String> {
        self.received.read().await.get(key).cloned()
    }

    /// Number of distinct keys received
    pub async fn received_count(&self) -> usize {
        self.received.read().await.len()
    }
}

#[async_trait]
impl RemoteBackend for SimulatedBackend {
    async fn push(&self, key: &str, blob: &str) -> Result<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Storage(format!("simulated network failure pushing `{key}`")));
        }

        debug!(key, bytes = blob.len(), "simulated backend accepted push");
        self.received
            .write()
            .await
            .insert(key.to_string(), blob.to_string());
        Ok(())
    }
}
