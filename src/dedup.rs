//! Duplicate medication schedule cleanup.
//!
//! Schedules are grouped by trimmed, lowercased name. Within a group the most recently
//! created schedule survives; ties keep stored order. Each duplicate is deleted on its
//! own so one failure does not stop the rest.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Result, StoreError};
use crate::metrics::MetricsCollector;
use crate::models::MedicationSchedule;
use crate::repository::HealthRepository;

/// Where schedules are read from and deleted
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScheduleSource: Send + Sync {
    /// Schedules owned by `user_id`
    async fn medication_schedules(&self, user_id: &str) -> Result<Vec<MedicationSchedule>>;

    /// Delete one schedule by id
    async fn delete_medication_schedule(&self, id: &str) -> Result<bool>;
}

#[async_trait]
impl ScheduleSource for HealthRepository {
    async fn medication_schedules(&self, user_id: &str) -> Result<Vec<MedicationSchedule>> {
        Self::medication_schedules(self, user_id).await
    }

    async fn delete_medication_schedule(&self, id: &str) -> Result<bool> {
        Self::delete_medication_schedule(self, id).await
    }
}

/// Outcome of a cleanup run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupSummary {
    /// Schedules found before cleanup
    pub total_medications: usize,
    /// Duplicates deleted
    pub duplicates_removed: usize,
    /// Schedules left, `total_medications - duplicates_removed`
    pub active_medications: usize,
    /// Duplicates whose deletion failed
    pub failed_removals: usize,
}

/// Schedules sharing one normalized name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    /// Trimmed, lowercased medication name
    pub normalized_name: String,
    /// Schedule that is kept
    pub survivor: MedicationSchedule,
    /// Schedules that would be removed, newest first
    pub duplicates: Vec<MedicationSchedule>,
}

/// Read-only view of what a cleanup would remove
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateSummary {
    /// Schedules found
    pub total_medications: usize,
    /// Groups with at least one duplicate
    pub groups: Vec<DuplicateGroup>,
}

impl DuplicateSummary {
    /// Number of schedules a cleanup would remove
    #[must_use]
    pub fn duplicate_count(&self) -> usize {
        self.groups.iter().map(|g| g.duplicates.len()).sum()
    }
}

/// Normalized grouping key for a medication name
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Group schedules by normalized name, keeping groups in first-seen order
fn find_duplicates(schedules: Vec<MedicationSchedule>) -> DuplicateSummary {
    let total_medications = schedules.len();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut grouped: Vec<(String, Vec<MedicationSchedule>)> = Vec::new();

    for schedule in schedules {
        let key = normalize_name(&schedule.medication_name);
        match index.get(&key) {
            Some(&i) => grouped[i].1.push(schedule),
            None => {
                index.insert(key.clone(), grouped.len());
                grouped.push((key, vec![schedule]));
            },
        }
    }

    let groups = grouped
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|(normalized_name, mut members)| {
            // stable: equal createdAt keeps stored order
            members.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            let survivor = members.remove(0);
            DuplicateGroup {
                normalized_name,
                survivor,
                duplicates: members,
            }
        })
        .collect();

    DuplicateSummary {
        total_medications,
        groups,
    }
}

/// Finds and removes duplicate medication schedules
pub struct MedicationDeduplicator {
    source: Arc<dyn ScheduleSource>,
}

impl MedicationDeduplicator {
    /// Create a deduplicator over `source`
    pub fn new(source: Arc<dyn ScheduleSource>) -> Self {
        Self { source }
    }

    /// Groups that a cleanup would collapse, without changing anything
    pub async fn duplicate_summary(&self, user_id: &str) -> Result<DuplicateSummary> {
        let schedules = self.source.medication_schedules(user_id).await?;
        Ok(find_duplicates(schedules))
    }

    /// Delete every duplicate, keeping the newest schedule of each name.
    ///
    /// Reading the schedules must succeed; individual deletions may fail and are
    /// counted in `failed_removals`. Running it again on clean data removes nothing.
    pub async fn cleanup_duplicate_medications(&self, user_id: &str) -> Result<CleanupSummary> {
        let summary = self.duplicate_summary(user_id).await?;
        let mut removed = 0;
        let mut failed = 0;

        for group in &summary.groups {
            for duplicate in &group.duplicates {
                match self.source.delete_medication_schedule(&duplicate.id).await {
                    Ok(_) => removed += 1,
                    Err(e) => {
                        let err = StoreError::DuplicateResolution {
                            id: duplicate.id.clone(),
                            reason: e.to_string(),
                        };
                        warn!(medication = %group.normalized_name, error = %err, "duplicate not removed");
                        failed += 1;
                    },
                }
            }
        }

        MetricsCollector::record_duplicate_cleanup(removed, failed);
        let result = CleanupSummary {
            total_medications: summary.total_medications,
            duplicates_removed: removed,
            active_medications: summary.total_medications - removed,
            failed_removals: failed,
        };
        info!(
            user_id,
            total = result.total_medications,
            removed = result.duplicates_removed,
            failed = result.failed_removals,
            "duplicate medication cleanup finished"
        );
        Ok(result)
    }
}
