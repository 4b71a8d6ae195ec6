//! Wiring of the store, repositories and coordinators.
//!
//! [`CompanionServices`] is built once by the host and handed around; nothing in the
//! library keeps global state.

use std::sync::Arc;

use tracing::info;

use crate::config::AppConfig;
use crate::dedup::{CleanupSummary, MedicationDeduplicator};
use crate::error::Result;
use crate::logging::OperationTimer;
use crate::migration::{migrate_community_data, MigrationReport};
use crate::models::{AdherenceSummary, MedicationSchedule, NewMedicationSchedule};
use crate::repository::crash_reports::CrashInput;
use crate::repository::{
    AchievementRepository, CommunicationRepository, CommunityRepository, CrashReportRepository, HealthRepository,
    PrivacyRepository, ProgressRepository, PushTokenRepository, RoutineRepository,
};
use crate::sanitizer::{RetentionCleaner, RetentionReport, Sanitizer};
use crate::security::PinStore;
use crate::storage::{KeyValueStore, SledStore};
use crate::sync::{ChangeJournal, ConnectivityState, RemoteBackend, SimulatedBackend, SyncCoordinator};
use crate::utils::with_timeout;

/// Every service of the app, sharing one store and one change journal
pub struct CompanionServices {
    config: AppConfig,
    store: Arc<dyn KeyValueStore>,
    journal: Arc<ChangeJournal>,
    /// Contacts, messages and video calls
    pub communication: CommunicationRepository,
    /// Medication schedules, dose logs and check-ins
    pub health: HealthRepository,
    /// Community resources, activities and events
    pub community: CommunityRepository,
    /// Daily routine items
    pub routines: RoutineRepository,
    /// Achievements and their progress
    pub achievements: AchievementRepository,
    /// Per-day routine progress
    pub progress: ProgressRepository,
    /// Privacy settings, family access and audit trail
    pub privacy: PrivacyRepository,
    /// Sanitized crash reports
    pub crash_reports: CrashReportRepository,
    /// Device push registrations
    pub push_tokens: PushTokenRepository,
    /// PIN and auth token in the secure namespace
    pub pins: PinStore,
    /// Connectivity tracking and push to the backend
    pub sync: SyncCoordinator,
    /// Duplicate medication cleanup
    pub deduplicator: MedicationDeduplicator,
    /// Retention window pruning
    pub retention: RetentionCleaner,
}

impl CompanionServices {
    /// Open the sled store at `config.storage.path` with a simulated backend
    pub fn open(config: AppConfig) -> Result<Self> {
        let store: Arc<dyn KeyValueStore> =
            Arc::new(SledStore::open(&config.storage.path, config.storage.flush_on_write)?);
        let backend: Arc<dyn RemoteBackend> = Arc::new(SimulatedBackend::new(config.simulated_latency()));
        info!(path = %config.storage.path, "opened companion store");
        Ok(Self::with_store(store, backend, config))
    }

    /// Build every service over an existing store and backend
    pub fn with_store(store: Arc<dyn KeyValueStore>, backend: Arc<dyn RemoteBackend>, config: AppConfig) -> Self {
        let journal = Arc::new(ChangeJournal::new(Arc::clone(&store)));
        let sanitizer = Arc::new(Sanitizer::new(config.privacy.hash_salt.clone()));

        let repo_store = || Arc::clone(&store);
        let repo_journal = || Arc::clone(&journal);

        let health = HealthRepository::new(repo_store(), repo_journal());
        let privacy = PrivacyRepository::new(repo_store(), repo_journal(), Arc::clone(&sanitizer));
        let crash_reports = CrashReportRepository::new(
            repo_store(),
            repo_journal(),
            privacy.clone(),
            sanitizer,
            config.crash.max_reports,
            config.crash.app_version.clone(),
        );

        Self {
            communication: CommunicationRepository::new(repo_store(), repo_journal()),
            community: CommunityRepository::new(repo_store(), repo_journal()),
            routines: RoutineRepository::new(repo_store(), repo_journal()),
            achievements: AchievementRepository::new(repo_store(), repo_journal()),
            progress: ProgressRepository::new(repo_store(), repo_journal()),
            push_tokens: PushTokenRepository::new(repo_store(), repo_journal()),
            pins: PinStore::new(repo_store()),
            sync: SyncCoordinator::new(
                repo_store(),
                repo_journal(),
                backend,
                config.retry_policy(),
                ConnectivityState::Online,
            ),
            deduplicator: MedicationDeduplicator::new(Arc::new(health.clone())),
            retention: RetentionCleaner::new(privacy.clone(), crash_reports.clone(), health.clone()),
            health,
            privacy,
            crash_reports,
            store,
            journal,
            config,
        }
    }

    /// Effective configuration
    #[must_use]
    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Schedules of `user_id`, bounded by the configured load timeout
    pub async fn get_medication_schedules(&self, user_id: &str) -> Result<Vec<MedicationSchedule>> {
        with_timeout(self.config.load_timeout(), self.health.medication_schedules(user_id)).await
    }

    /// Create a schedule
    pub async fn create_medication_schedule(&self, input: NewMedicationSchedule) -> Result<MedicationSchedule> {
        self.health.create_medication_schedule(input).await
    }

    /// Adherence of `user_id`, bounded by the configured load timeout
    pub async fn medication_adherence(&self, user_id: &str) -> Result<AdherenceSummary> {
        with_timeout(self.config.load_timeout(), self.health.adherence(user_id)).await
    }

    /// Collapse duplicate schedules of `user_id`
    pub async fn cleanup_duplicate_medications(&self, user_id: &str) -> Result<CleanupSummary> {
        let timer = OperationTimer::new("cleanup_duplicate_medications");
        let summary = self.deduplicator.cleanup_duplicate_medications(user_id).await?;
        timer.finish();
        Ok(summary)
    }

    /// Prune logs and reports past the retention window
    pub async fn cleanup_old_data(&self) -> Result<RetentionReport> {
        let timer = OperationTimer::new("cleanup_old_data");
        let report = self.retention.cleanup_old_data().await?;
        timer.finish();
        Ok(report)
    }

    /// Record a crash; `None` when reporting is disabled
    pub async fn report_crash(&self, input: CrashInput) -> Result<Option<crate::models::CrashReport>> {
        self.crash_reports.record_crash(input).await
    }

    /// Rewrite legacy community records with an explicit kind
    pub async fn migrate(&self) -> Result<MigrationReport> {
        migrate_community_data(Arc::clone(&self.store), Arc::clone(&self.journal)).await
    }

    /// Aggregates changed since the last successful push
    pub async fn pending_changes(&self) -> Result<Vec<String>> {
        self.journal.pending_keys().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn services() -> CompanionServices {
        CompanionServices::with_store(
            Arc::new(MemoryStore::new()),
            Arc::new(SimulatedBackend::default()),
            AppConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_repositories_share_one_store() {
        let services = services();
        services
            .create_medication_schedule(NewMedicationSchedule {
                user_id: "u1".into(),
                medication_name: "Aspirin".into(),
                dosage: "81mg".into(),
                frequency: "daily".into(),
                times: vec!["08:00".into()],
                instructions: None,
            })
            .await
            .unwrap();

        assert_eq!(services.get_medication_schedules("u1").await.unwrap().len(), 1);
        assert_eq!(services.pending_changes().await.unwrap(), vec!["health_data".to_string()]);
    }

    #[tokio::test]
    async fn test_sync_pushes_pending_changes() {
        let services = services();
        services.push_tokens.register("tok", "ios").await.unwrap();
        let report = services.sync.sync_all().await.unwrap();
        assert_eq!(report.pushed, vec!["push_tokens".to_string()]);
        assert!(services.pending_changes().await.unwrap().is_empty());
    }
}
