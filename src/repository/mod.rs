//! Repository pattern for data access
//!
//! Each aggregate lives as one JSON blob under one storage key. [`BlobRepository`] does
//! the whole-blob read-modify-write; the domain repositories in the submodules build
//! their typed operations on top of it.
//!
//! There is no cross-call locking: two overlapping [`BlobRepository::update`] calls on
//! the same aggregate race and the later save wins. Every update re-reads the latest
//! blob, so nothing is ever written from state held across an earlier await.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::codec;
use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::models::{CommunicationData, CommunityData, CrashReport, HealthData, PrivacyAuditEntry, PrivacySettings, PushToken};
use crate::storage::{KeyValueStore, Namespace};
use crate::sync::ChangeJournal;

pub mod communication;
pub mod community;
pub mod crash_reports;
pub mod health;
pub mod privacy;
pub mod push_tokens;

pub use communication::CommunicationRepository;
pub use community::{AchievementRepository, CommunityRepository, ProgressRepository, RoutineRepository};
pub use crash_reports::CrashReportRepository;
pub use health::HealthRepository;
pub use privacy::PrivacyRepository;
pub use push_tokens::PushTokenRepository;

/// Storage keys of the persisted layout
pub mod keys {
    /// Contacts, messages, calls
    pub const COMMUNICATION_DATA: &str = "communication_data";
    /// Check-ins, medication schedules and logs
    pub const HEALTH_DATA: &str = "health_data";
    /// Resources, activities, events
    pub const COMMUNITY_DATA: &str = "community_data";
    /// Privacy preferences and family grants
    pub const PRIVACY_SETTINGS: &str = "privacy_settings";
    /// Privacy audit trail
    pub const PRIVACY_AUDIT_LOG: &str = "privacy_audit_log";
    /// Crash report ring buffer
    pub const CRASH_REPORTS: &str = "crash_reports";
    /// Device push registrations
    pub const PUSH_TOKENS: &str = "push_tokens";
    /// Aggregates awaiting push to the backend
    pub const SYNC_PENDING: &str = "sync_pending";
    /// Instant of the last fully successful sync
    pub const LAST_SYNC_TIME: &str = "last_sync_time";
    /// Hashed PIN, secure namespace
    pub const USER_PIN_HASH: &str = "user_pin_hash";
    /// Backend auth token, secure namespace
    pub const AUTH_TOKEN: &str = "auth_token";

    /// Every aggregate the sync coordinator pushes
    pub const SYNCED_AGGREGATES: [&str; 7] = [
        COMMUNICATION_DATA,
        HEALTH_DATA,
        COMMUNITY_DATA,
        PRIVACY_SETTINGS,
        PRIVACY_AUDIT_LOG,
        CRASH_REPORTS,
        PUSH_TOKENS,
    ];

    /// Key holding the raw value of a blob that failed to decode
    #[must_use]
    pub fn corrupt_backup(key: &str) -> String {
        format!("{key}.corrupt")
    }
}

/// A collection persisted as one blob under a fixed key
pub trait Aggregate: Serialize + DeserializeOwned + Default + Send + Sync + 'static {
    /// Storage key of the blob
    const KEY: &'static str;

    /// Records present in `raw` that decoding skipped. Saving `self` would lose them.
    fn records_dropped(&self, _raw: &str) -> usize {
        0
    }
}

impl Aggregate for CommunicationData {
    const KEY: &'static str = keys::COMMUNICATION_DATA;
}

impl Aggregate for HealthData {
    const KEY: &'static str = keys::HEALTH_DATA;
}

impl Aggregate for CommunityData {
    const KEY: &'static str = keys::COMMUNITY_DATA;

    fn records_dropped(&self, raw: &str) -> usize {
        serde_json::from_str::<serde_json::Value>(raw)
            .ok()
            .and_then(|doc| doc.get("activities").and_then(serde_json::Value::as_array).map(Vec::len))
            .map_or(0, |stored| stored.saturating_sub(self.activities.len()))
    }
}

impl Aggregate for PrivacySettings {
    const KEY: &'static str = keys::PRIVACY_SETTINGS;
}

impl Aggregate for Vec<PrivacyAuditEntry> {
    const KEY: &'static str = keys::PRIVACY_AUDIT_LOG;
}

impl Aggregate for Vec<CrashReport> {
    const KEY: &'static str = keys::CRASH_REPORTS;
}

impl Aggregate for Vec<PushToken> {
    const KEY: &'static str = keys::PUSH_TOKENS;
}

/// Whole-blob read-modify-write over one aggregate
pub struct BlobRepository<A> {
    store: Arc<dyn KeyValueStore>,
    journal: Arc<ChangeJournal>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A> Clone for BlobRepository<A> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            journal: Arc::clone(&self.journal),
            _aggregate: PhantomData,
        }
    }
}

impl<A: Aggregate> BlobRepository<A> {
    /// Create a repository over `store`, recording writes in `journal`
    pub fn new(store: Arc<dyn KeyValueStore>, journal: Arc<ChangeJournal>) -> Self {
        Self {
            store,
            journal,
            _aggregate: PhantomData,
        }
    }

    /// Load the aggregate.
    ///
    /// A missing key yields the default aggregate. A blob that fails to decode is
    /// copied aside under [`keys::corrupt_backup`] and the default is returned with
    /// a warning. A blob that decodes but loses individual records is copied aside the
    /// same way before anything can overwrite it. Storage faults are returned to the
    /// caller.
    pub async fn load(&self) -> Result<A> {
        let started = Instant::now();
        let raw = self.store.get(Namespace::Standard, A::KEY).await;
        MetricsCollector::record_store_operation("get", started.elapsed(), raw.is_ok());

        let Some(raw) = raw? else {
            debug!(key = A::KEY, "no stored blob, using default");
            return Ok(A::default());
        };

        match codec::decode::<A>(A::KEY, &raw) {
            Ok(value) => {
                let dropped = value.records_dropped(&raw);
                if dropped > 0 {
                    warn!(key = A::KEY, dropped, "stored blob has unreadable records, keeping a copy");
                    MetricsCollector::record_decode_fallback(A::KEY);
                    self.back_up(&raw).await;
                }
                Ok(value)
            },
            Err(e) => {
                warn!(key = A::KEY, error = %e, "stored blob is malformed, falling back to default");
                MetricsCollector::record_decode_fallback(A::KEY);
                self.back_up(&raw).await;
                Ok(A::default())
            },
        }
    }

    async fn back_up(&self, raw: &str) {
        let backup = keys::corrupt_backup(A::KEY);
        if let Err(e) = self.store.set(Namespace::Standard, &backup, raw).await {
            warn!(key = A::KEY, error = %e, "could not back up stored blob");
        }
    }

    /// Replace the stored aggregate and mark it pending for sync
    pub async fn save(&self, value: &A) -> Result<()> {
        let raw = codec::encode(value)?;

        let started = Instant::now();
        let written = self.store.set(Namespace::Standard, A::KEY, &raw).await;
        MetricsCollector::record_store_operation("set", started.elapsed(), written.is_ok());
        written?;

        self.journal.mark(A::KEY).await
    }

    /// Load the latest blob, apply `mutate`, and save the result.
    ///
    /// Nothing is written when `mutate` returns an error.
    pub async fn update<T, F>(&self, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut A) -> Result<T> + Send,
    {
        let mut value = self.load().await?;
        let out = mutate(&mut value)?;
        self.save(&value).await?;
        Ok(out)
    }

    /// Raw stored value, if any
    pub async fn raw(&self) -> Result<Option<String>> {
        self.store.get(Namespace::Standard, A::KEY).await
    }
}
