//! Synchronization coordinator
//!
//! Local storage is always the source of truth. Writes succeed regardless of
//! connectivity and are recorded in the [`ChangeJournal`]; a sync pushes the latest
//! blob of every pending aggregate and never modifies local data, whether it succeeds
//! or fails.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use crate::codec;
use crate::error::{Result, SyncError};
use crate::metrics::MetricsTimer;
use crate::repository::keys;
use crate::storage::{KeyValueStore, Namespace};

mod backend;
mod journal;

pub use backend::{RemoteBackend, SimulatedBackend};
#[cfg(test)]
pub use backend::MockRemoteBackend;
pub use journal::ChangeJournal;

/// Connectivity and sync state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    /// Connected, idle
    Online,
    /// No connectivity; writes stay local
    Offline,
    /// Connected, pushing pending aggregates
    SyncInProgress,
}

impl std::fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
            Self::SyncInProgress => write!(f, "syncing"),
        }
    }
}

/// Exponential backoff with jitter for individual pushes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per push, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped,
    /// plus up to half of that again as jitter, never exceeding `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self
            .base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay);

        let jitter_cap = u64::try_from(backoff.as_millis() / 2).unwrap_or(u64::MAX);
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_cap)
        };

        (backoff + Duration::from_millis(jitter)).min(self.max_delay)
    }
}

/// Outcome of a successful sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Aggregates pushed in this run
    pub pushed: Vec<String>,
    /// Recorded as the new `last_sync_time`
    pub completed_at: DateTime<Utc>,
}

/// Snapshot of the coordinator for status screens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    /// Current state
    pub state: ConnectivityState,
    /// Last fully successful sync
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Aggregates awaiting push
    pub pending: Vec<String>,
    /// Failed runs since the last success
    pub consecutive_failures: u32,
    /// Message of the most recent failure
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct FailureRecord {
    consecutive: u32,
    last_error: Option<String>,
}

/// Tracks connectivity, defers pushes while offline, and replays them on reconnect.
pub struct SyncCoordinator {
    store: Arc<dyn KeyValueStore>,
    journal: Arc<ChangeJournal>,
    backend: Arc<dyn RemoteBackend>,
    retry: RetryPolicy,
    state: watch::Sender<ConnectivityState>,
    // held for the whole run, independent of connectivity changes mid-sync
    in_flight: AtomicBool,
    failures: Mutex<FailureRecord>,
}

impl SyncCoordinator {
    /// Create a coordinator starting in `initial` state
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        journal: Arc<ChangeJournal>,
        backend: Arc<dyn RemoteBackend>,
        retry: RetryPolicy,
        initial: ConnectivityState,
    ) -> Self {
        let initial = if initial == ConnectivityState::SyncInProgress {
            ConnectivityState::Online
        } else {
            initial
        };
        let (state, _) = watch::channel(initial);
        Self {
            store,
            journal,
            backend,
            retry,
            state,
            in_flight: AtomicBool::new(false),
            failures: Mutex::new(FailureRecord::default()),
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ConnectivityState {
        *self.state.borrow()
    }

    /// Watch state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityState> {
        self.state.subscribe()
    }

    /// Feed a connectivity signal from the host platform.
    ///
    /// Going offline only changes state. Coming back online from `Offline` runs
    /// [`Self::resume_sync`]; its error, if any, is returned while the state stays
    /// `Online`.
    pub async fn set_online(&self, online: bool) -> Result<Option<SyncReport>> {
        let previous = self.state();

        if !online {
            if previous != ConnectivityState::Offline {
                info!(from = %previous, "connectivity lost");
                self.state.send_replace(ConnectivityState::Offline);
            }
            return Ok(None);
        }

        if previous != ConnectivityState::Offline {
            return Ok(None);
        }

        info!("connectivity restored");
        self.state.send_replace(ConnectivityState::Online);
        self.resume_sync().await
    }

    /// Whether a sync run is currently pushing
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Replay pending changes, if any. A run already in flight picks them up instead.
    pub async fn resume_sync(&self) -> Result<Option<SyncReport>> {
        if self.is_syncing() {
            info!("sync already running, not starting another");
            return Ok(None);
        }
        if self.journal.pending_keys().await?.is_empty() {
            return Ok(None);
        }
        self.sync_all().await.map(Some)
    }

    /// Push every pending aggregate to the backend.
    ///
    /// On failure the error is recorded and returned, `last_sync_time` is left alone,
    /// and keys that did not make it stay pending.
    pub async fn sync_all(&self) -> Result<SyncReport> {
        if self.state() == ConnectivityState::Offline {
            return Err(SyncError::Offline.into());
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SyncError::InProgress.into());
        }
        self.state.send_if_modified(|state| {
            if *state == ConnectivityState::Online {
                *state = ConnectivityState::SyncInProgress;
                true
            } else {
                false
            }
        });

        let timer = MetricsTimer::start();
        let outcome = self.push_pending().await;
        self.in_flight.store(false, Ordering::Release);

        self.state.send_if_modified(|state| {
            if *state == ConnectivityState::SyncInProgress {
                *state = ConnectivityState::Online;
                true
            } else {
                false
            }
        });

        let mut failures = self.failures.lock().await;
        match &outcome {
            Ok(report) => {
                info!(
                    pushed = report.pushed.len(),
                    duration_ms = timer.elapsed().as_millis(),
                    "sync completed"
                );
                *failures = FailureRecord::default();
                timer.finish_sync(report.pushed.len(), true);
            },
            Err(e) => {
                warn!(error = %e, "sync failed, local data kept as is");
                failures.consecutive += 1;
                failures.last_error = Some(e.to_string());
                timer.finish_sync(0, false);
            },
        }

        outcome
    }

    async fn push_pending(&self) -> Result<SyncReport> {
        let snapshot = self.journal.snapshot().await?;
        let mut pushed = Vec::new();
        let mut failed = 0;
        let mut last_error = String::new();

        for (key, revision) in &snapshot {
            let Some(blob) = self.store.get(Namespace::Standard, key).await? else {
                self.journal.acknowledge(key, *revision).await?;
                continue;
            };

            match self.push_with_retry(key, &blob).await {
                Ok(()) => {
                    self.journal.acknowledge(key, *revision).await?;
                    pushed.push(key.clone());
                },
                Err(e) => {
                    failed += 1;
                    last_error = e.to_string();
                },
            }
        }

        if failed > 0 {
            return Err(SyncError::Push {
                attempted: snapshot.len(),
                failed,
                message: last_error,
            }
            .into());
        }

        let completed_at = codec::now();
        self.store
            .set(Namespace::Standard, keys::LAST_SYNC_TIME, &codec::format_timestamp(&completed_at))
            .await?;

        Ok(SyncReport { pushed, completed_at })
    }

    async fn push_with_retry(&self, key: &str, blob: &str) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.backend.push(key, blob).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.retry.max_attempts && self.state() != ConnectivityState::Offline => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(key, attempt, delay_ms = delay.as_millis(), error = %e, "push failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Instant of the last fully successful sync
    pub async fn last_sync_time(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.store.get(Namespace::Standard, keys::LAST_SYNC_TIME).await? else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(raw.trim()) {
            Ok(at) => Ok(Some(at.with_timezone(&Utc))),
            Err(e) => {
                warn!(error = %e, "stored last sync time is malformed");
                Ok(None)
            },
        }
    }

    /// Current status for display
    pub async fn status(&self) -> Result<SyncStatus> {
        let pending = self.journal.pending_keys().await?;
        let last_sync_time = self.last_sync_time().await?;
        let failures = self.failures.lock().await;
        Ok(SyncStatus {
            state: self.state(),
            last_sync_time,
            pending,
            consecutive_failures: failures.consecutive,
            last_error: failures.last_error.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::storage::MemoryStore;

    fn quick_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    async fn coordinator(
        backend: Arc<dyn RemoteBackend>,
        initial: ConnectivityState,
        max_attempts: u32,
    ) -> (SyncCoordinator, Arc<MemoryStore>, Arc<ChangeJournal>) {
        let store = Arc::new(MemoryStore::new());
        let journal = Arc::new(ChangeJournal::new(store.clone()));
        let coordinator = SyncCoordinator::new(
            store.clone(),
            Arc::clone(&journal),
            backend,
            quick_retry(max_attempts),
            initial,
        );
        (coordinator, store, journal)
    }

    async fn write(store: &MemoryStore, journal: &ChangeJournal, key: &str, value: &str) {
        store.set(Namespace::Standard, key, value).await.unwrap();
        journal.mark(key).await.unwrap();
    }

    #[test]
    fn test_delay_grows_and_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
        };
        let first = policy.delay_for(1);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(150));
        let third = policy.delay_for(3);
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(600));
        assert_eq!(policy.delay_for(10), Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn test_sync_offline_is_rejected() {
        let backend = Arc::new(MockRemoteBackend::new());
        let (coordinator, _, _) = coordinator(backend, ConnectivityState::Offline, 1).await;

        let err = coordinator.sync_all().await.unwrap_err();
        assert!(matches!(err, StoreError::Sync(SyncError::Offline)));
        assert_eq!(coordinator.last_sync_time().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sync_pushes_pending_and_records_time() {
        let backend = Arc::new(SimulatedBackend::default());
        let (coordinator, store, journal) =
            coordinator(backend.clone(), ConnectivityState::Online, 1).await;
        write(&store, &journal, keys::HEALTH_DATA, "{}").await;

        let report = coordinator.sync_all().await.unwrap();

        assert_eq!(report.pushed, vec![keys::HEALTH_DATA.to_string()]);
        assert_eq!(backend.received(keys::HEALTH_DATA).await.as_deref(), Some("{}"));
        assert_eq!(coordinator.last_sync_time().await.unwrap(), Some(report.completed_at));
        assert!(journal.pending_keys().await.unwrap().is_empty());
        assert_eq!(coordinator.state(), ConnectivityState::Online);
    }

    #[tokio::test]
    async fn test_push_retries_then_succeeds() {
        let backend = Arc::new(SimulatedBackend::default());
        backend.fail_next(2);
        let (coordinator, store, journal) =
            coordinator(backend.clone(), ConnectivityState::Online, 3).await;
        write(&store, &journal, keys::CRASH_REPORTS, "[]").await;

        coordinator.sync_all().await.unwrap();
        assert_eq!(backend.received_count().await, 1);
    }

    #[tokio::test]
    async fn test_failed_sync_keeps_local_state_and_last_sync_time() {
        let mut backend = MockRemoteBackend::new();
        backend
            .expect_push()
            .times(2)
            .returning(|_, _| Err(StoreError::Storage("503".into())));
        let (coordinator, store, journal) =
            coordinator(Arc::new(backend), ConnectivityState::Online, 2).await;
        write(&store, &journal, keys::HEALTH_DATA, r#"{"medicationSchedules":[]}"#).await;

        let err = coordinator.sync_all().await.unwrap_err();

        assert!(matches!(err, StoreError::Sync(SyncError::Push { failed: 1, .. })));
        assert_eq!(coordinator.last_sync_time().await.unwrap(), None);
        assert_eq!(
            store.get(Namespace::Standard, keys::HEALTH_DATA).await.unwrap().as_deref(),
            Some(r#"{"medicationSchedules":[]}"#)
        );
        let status = coordinator.status().await.unwrap();
        assert_eq!(status.pending, vec![keys::HEALTH_DATA.to_string()]);
        assert_eq!(status.consecutive_failures, 1);
        assert_eq!(status.state, ConnectivityState::Online);
    }

    #[tokio::test]
    async fn test_reconnect_resumes_sync() {
        let backend = Arc::new(SimulatedBackend::default());
        let (coordinator, store, journal) =
            coordinator(backend.clone(), ConnectivityState::Online, 1).await;
        let mut states = coordinator.subscribe();

        coordinator.set_online(false).await.unwrap();
        assert_eq!(*states.borrow_and_update(), ConnectivityState::Offline);
        write(&store, &journal, keys::COMMUNICATION_DATA, "{}").await;

        let report = coordinator.set_online(true).await.unwrap().unwrap();

        assert_eq!(report.pushed, vec![keys::COMMUNICATION_DATA.to_string()]);
        assert_eq!(coordinator.state(), ConnectivityState::Online);
    }

    #[tokio::test]
    async fn test_flapping_connectivity_does_not_start_second_sync() {
        let backend = Arc::new(SimulatedBackend::new(Duration::from_millis(100)));
        let (coordinator, store, journal) =
            coordinator(backend.clone(), ConnectivityState::Online, 1).await;
        write(&store, &journal, keys::HEALTH_DATA, "{}").await;

        let flap = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(coordinator.is_syncing());
            coordinator.set_online(false).await.unwrap();
            let resumed = coordinator.set_online(true).await.unwrap();
            let direct = coordinator.sync_all().await;
            (resumed, direct)
        };
        let (first, (resumed, direct)) = tokio::join!(coordinator.sync_all(), flap);

        assert_eq!(first.unwrap().pushed, vec![keys::HEALTH_DATA.to_string()]);
        assert_eq!(resumed, None);
        assert!(matches!(direct, Err(StoreError::Sync(SyncError::InProgress))));
        assert!(!coordinator.is_syncing());
        assert_eq!(coordinator.state(), ConnectivityState::Online);
    }

    #[tokio::test]
    async fn test_reconnect_with_nothing_pending_skips_sync() {
        let backend = Arc::new(MockRemoteBackend::new());
        let (coordinator, _, _) = coordinator(backend, ConnectivityState::Offline, 1).await;

        assert_eq!(coordinator.set_online(true).await.unwrap(), None);
        assert_eq!(coordinator.last_sync_time().await.unwrap(), None);
    }
}
