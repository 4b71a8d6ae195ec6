use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{BlobRepository, PrivacyRepository};
use crate::codec::now;
use crate::error::Result;
use crate::models::CrashReport;
use crate::sanitizer::{prune_older_than, Sanitizer};
use crate::storage::KeyValueStore;
use crate::sync::ChangeJournal;
use crate::utils::new_id;

/// Default number of reports kept
pub const DEFAULT_MAX_REPORTS: usize = 50;

/// An error to report, before sanitizing
#[derive(Debug, Clone, Default)]
pub struct CrashInput {
    /// Error class
    pub error_type: String,
    /// Raw message
    pub message: String,
    /// Raw stack trace
    pub stack: Option<String>,
    /// Plain user id; only its hash is stored
    pub user_id: Option<String>,
    /// Happened on an emergency flow
    pub is_emergency_related: bool,
}

impl CrashInput {
    /// Report of `error_type` with `message`
    #[must_use]
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            ..Self::default()
        }
    }
}

/// Bounded store of sanitized crash reports
#[derive(Clone)]
pub struct CrashReportRepository {
    blobs: BlobRepository<Vec<CrashReport>>,
    privacy: PrivacyRepository,
    sanitizer: Arc<Sanitizer>,
    max_reports: usize,
    app_version: String,
}

impl CrashReportRepository {
    /// Create a repository keeping at most `max_reports`
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        journal: Arc<ChangeJournal>,
        privacy: PrivacyRepository,
        sanitizer: Arc<Sanitizer>,
        max_reports: usize,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            blobs: BlobRepository::new(store, journal),
            privacy,
            sanitizer,
            max_reports: max_reports.max(1),
            app_version: app_version.into(),
        }
    }

    /// Sanitize and store a report, dropping the oldest beyond the cap.
    ///
    /// Returns `None` without writing when crash reporting is disabled.
    pub async fn record_crash(&self, input: CrashInput) -> Result<Option<CrashReport>> {
        if !self.privacy.settings().await?.crash_reporting_enabled {
            debug!(error_type = %input.error_type, "crash reporting disabled, report dropped");
            return Ok(None);
        }

        let report = CrashReport {
            id: new_id(),
            timestamp: now(),
            error_type: input.error_type,
            message: self.sanitizer.sanitize_text(&input.message),
            stack: input.stack.map(|s| self.sanitizer.sanitize_text(&s)),
            user_id: input.user_id.map(|u| self.sanitizer.hash_value(&u)),
            is_emergency_related: input.is_emergency_related,
            app_version: self.app_version.clone(),
        };
        if report.is_emergency_related {
            warn!(error_type = %report.error_type, "emergency-related crash recorded");
        }

        let max_reports = self.max_reports;
        self.blobs
            .update(move |reports| {
                reports.push(report.clone());
                if reports.len() > max_reports {
                    let excess = reports.len() - max_reports;
                    reports.drain(..excess);
                }
                Ok(Some(report))
            })
            .await
    }

    /// Stored reports, oldest first
    pub async fn reports(&self) -> Result<Vec<CrashReport>> {
        self.blobs.load().await
    }

    /// Reports flagged as emergency-related
    pub async fn emergency_reports(&self) -> Result<Vec<CrashReport>> {
        Ok(self
            .reports()
            .await?
            .into_iter()
            .filter(|r| r.is_emergency_related)
            .collect())
    }

    /// Remove every report
    pub async fn clear(&self) -> Result<()> {
        self.blobs.save(&Vec::new()).await
    }

    /// Drop reports older than `cutoff`. Writes only when something went.
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut reports = self.reports().await?;
        let removed = prune_older_than(&mut reports, cutoff);
        if removed > 0 {
            self.blobs.save(&reports).await?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn repo(max_reports: usize) -> (CrashReportRepository, PrivacyRepository) {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let journal = Arc::new(ChangeJournal::new(Arc::clone(&store)));
        let sanitizer = Arc::new(Sanitizer::new("salt"));
        let privacy = PrivacyRepository::new(Arc::clone(&store), Arc::clone(&journal), Arc::clone(&sanitizer));
        let crashes = CrashReportRepository::new(store, journal, privacy.clone(), sanitizer, max_reports, "1.2.3");
        (crashes, privacy)
    }

    #[tokio::test]
    async fn test_report_is_sanitized() {
        let (crashes, _) = repo(DEFAULT_MAX_REPORTS);
        let input = CrashInput {
            stack: Some("at call(555-123-4567)".into()),
            user_id: Some("user-42".into()),
            ..CrashInput::new("StorageError", "failed for bob@example.com")
        };

        let report = crashes.record_crash(input).await.unwrap().unwrap();
        assert_eq!(report.message, "failed for [email]");
        assert_eq!(report.stack.as_deref(), Some("at call([phone])"));
        assert_ne!(report.user_id.as_deref(), Some("user-42"));
        assert_eq!(report.app_version, "1.2.3");
    }

    #[tokio::test]
    async fn test_cap_drops_oldest() {
        let (crashes, _) = repo(3);
        for i in 0..5 {
            crashes
                .record_crash(CrashInput::new("E", format!("error {i}")))
                .await
                .unwrap();
        }
        let messages: Vec<String> = crashes.reports().await.unwrap().into_iter().map(|r| r.message).collect();
        assert_eq!(messages, vec!["error 2", "error 3", "error 4"]);
    }

    #[tokio::test]
    async fn test_disabled_reporting_writes_nothing() {
        let (crashes, privacy) = repo(DEFAULT_MAX_REPORTS);
        let mut settings = privacy.settings().await.unwrap();
        settings.crash_reporting_enabled = false;
        privacy.save_settings(settings).await.unwrap();

        assert!(crashes.record_crash(CrashInput::new("E", "x")).await.unwrap().is_none());
        assert!(crashes.reports().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_emergency_filter_and_clear() {
        let (crashes, _) = repo(DEFAULT_MAX_REPORTS);
        crashes.record_crash(CrashInput::new("E", "plain")).await.unwrap();
        crashes
            .record_crash(CrashInput {
                is_emergency_related: true,
                ..CrashInput::new("E", "sos failed")
            })
            .await
            .unwrap();

        assert_eq!(crashes.emergency_reports().await.unwrap().len(), 1);
        crashes.clear().await.unwrap();
        assert!(crashes.reports().await.unwrap().is_empty());
    }
}
