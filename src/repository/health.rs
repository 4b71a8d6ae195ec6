use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info};

use super::BlobRepository;
use crate::codec::now;
use crate::error::{Result, StoreError};
use crate::models::{
    AdherenceSummary, DailyCheckIn, HealthData, MedicationLog, MedicationSchedule, MedicationStatus,
    NewMedicationSchedule,
};
use crate::sanitizer::prune_older_than;
use crate::storage::KeyValueStore;
use crate::sync::ChangeJournal;
use crate::utils::new_id;
use crate::validation::InputValidator;

/// Medication schedules, dose logs and daily check-ins
#[derive(Clone)]
pub struct HealthRepository {
    blobs: BlobRepository<HealthData>,
}

impl HealthRepository {
    /// Create a repository over `store`
    pub fn new(store: Arc<dyn KeyValueStore>, journal: Arc<ChangeJournal>) -> Self {
        Self {
            blobs: BlobRepository::new(store, journal),
        }
    }

    /// Whole aggregate
    pub async fn load(&self) -> Result<HealthData> {
        self.blobs.load().await
    }

    /// Replace the whole aggregate
    pub async fn save(&self, data: &HealthData) -> Result<()> {
        self.blobs.save(data).await
    }

    /// Schedules owned by `user_id`, in stored order
    pub async fn medication_schedules(&self, user_id: &str) -> Result<Vec<MedicationSchedule>> {
        Ok(self
            .load()
            .await?
            .medication_schedules
            .into_iter()
            .filter(|s| s.user_id == user_id)
            .collect())
    }

    /// Validate and store a new schedule
    pub async fn create_medication_schedule(&self, input: NewMedicationSchedule) -> Result<MedicationSchedule> {
        InputValidator::validate_new_schedule(&input)?;
        let schedule = input.into_schedule();

        let created = self
            .blobs
            .update(move |data| {
                data.medication_schedules.push(schedule.clone());
                Ok(schedule)
            })
            .await?;

        info!(schedule_id = %created.id, medication = %created.medication_name, "medication schedule created");
        Ok(created)
    }

    /// Replace an existing schedule, keeping its owner and creation time
    pub async fn update_medication_schedule(&self, mut schedule: MedicationSchedule) -> Result<MedicationSchedule> {
        InputValidator::validate_schedule(&schedule)?;
        schedule.updated_at = now();

        self.blobs
            .update(move |data| {
                let existing = data
                    .medication_schedules
                    .iter_mut()
                    .find(|s| s.id == schedule.id)
                    .ok_or_else(|| StoreError::NotFound(format!("medication schedule {}", schedule.id)))?;
                schedule.user_id.clone_from(&existing.user_id);
                schedule.created_at = existing.created_at;
                *existing = schedule.clone();
                Ok(schedule)
            })
            .await
    }

    /// Delete a schedule. Its logs are kept and become orphans.
    ///
    /// Returns `true` when something was removed; a missing id writes nothing.
    pub async fn delete_medication_schedule(&self, id: &str) -> Result<bool> {
        let exists = self.load().await?.medication_schedules.iter().any(|s| s.id == id);
        if !exists {
            debug!(schedule_id = id, "delete of unknown medication schedule ignored");
            return Ok(false);
        }

        self.blobs
            .update(|data| {
                let before = data.medication_schedules.len();
                data.medication_schedules.retain(|s| s.id != id);
                Ok(data.medication_schedules.len() != before)
            })
            .await
    }

    /// Record one dose outcome
    pub async fn log_medication(
        &self,
        schedule_id: &str,
        scheduled_time: DateTime<Utc>,
        status: MedicationStatus,
    ) -> Result<MedicationLog> {
        let log = MedicationLog {
            id: new_id(),
            schedule_id: schedule_id.to_string(),
            scheduled_time,
            taken_at: (status == MedicationStatus::Taken).then(now),
            status,
            notes: None,
        };

        self.blobs
            .update(move |data| {
                if !data.medication_schedules.iter().any(|s| s.id == log.schedule_id) {
                    return Err(StoreError::NotFound(format!("medication schedule {}", log.schedule_id)));
                }
                data.medication_logs.push(log.clone());
                Ok(log)
            })
            .await
    }

    /// Logs for one schedule, oldest first
    pub async fn medication_logs(&self, schedule_id: &str) -> Result<Vec<MedicationLog>> {
        let mut logs: Vec<MedicationLog> = self
            .load()
            .await?
            .medication_logs
            .into_iter()
            .filter(|l| l.schedule_id == schedule_id)
            .collect();
        logs.sort_by_key(|l| l.scheduled_time);
        Ok(logs)
    }

    /// Dose outcome counts across the user's schedules.
    ///
    /// Logs pointing at a schedule that no longer exists are counted as orphaned
    /// and left out of the taken/missed/skipped totals.
    pub async fn adherence(&self, user_id: &str) -> Result<AdherenceSummary> {
        let data = self.load().await?;
        let known: HashSet<&str> = data.medication_schedules.iter().map(|s| s.id.as_str()).collect();
        let owned: HashSet<&str> = data
            .medication_schedules
            .iter()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.id.as_str())
            .collect();

        let mut summary = AdherenceSummary::default();
        for log in &data.medication_logs {
            if !known.contains(log.schedule_id.as_str()) {
                summary.orphaned += 1;
                continue;
            }
            if !owned.contains(log.schedule_id.as_str()) {
                continue;
            }
            match log.status {
                MedicationStatus::Taken => summary.taken += 1,
                MedicationStatus::Missed => summary.missed += 1,
                MedicationStatus::Skipped => summary.skipped += 1,
            }
        }
        Ok(summary)
    }

    /// Record the day's check-in, replacing an earlier one for the same user and date
    pub async fn record_check_in(
        &self,
        user_id: &str,
        date: NaiveDate,
        mood: u8,
        energy_level: u8,
        notes: Option<String>,
    ) -> Result<DailyCheckIn> {
        InputValidator::validate_scale("mood", mood)?;
        InputValidator::validate_scale("energy level", energy_level)?;

        let check_in = DailyCheckIn {
            id: new_id(),
            user_id: user_id.to_string(),
            date,
            mood,
            energy_level,
            notes: notes
                .map(|n| InputValidator::sanitize_input(&n))
                .filter(|n| !n.is_empty()),
            created_at: now(),
        };

        self.blobs
            .update(move |data| {
                match data
                    .daily_check_ins
                    .iter_mut()
                    .find(|c| c.user_id == check_in.user_id && c.date == check_in.date)
                {
                    Some(existing) => {
                        let id = existing.id.clone();
                        *existing = DailyCheckIn { id, ..check_in };
                        Ok(existing.clone())
                    },
                    None => {
                        data.daily_check_ins.push(check_in.clone());
                        Ok(check_in)
                    },
                }
            })
            .await
    }

    /// Check-ins of `user_id`, newest day first
    pub async fn check_ins(&self, user_id: &str) -> Result<Vec<DailyCheckIn>> {
        let mut check_ins: Vec<DailyCheckIn> = self
            .load()
            .await?
            .daily_check_ins
            .into_iter()
            .filter(|c| c.user_id == user_id)
            .collect();
        check_ins.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(check_ins)
    }

    /// Drop medication logs scheduled before `cutoff`. Writes only when something went.
    pub async fn prune_logs_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut data = self.load().await?;
        let removed = prune_older_than(&mut data.medication_logs, cutoff);
        if removed > 0 {
            self.blobs.save(&data).await?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn repo() -> HealthRepository {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let journal = Arc::new(ChangeJournal::new(Arc::clone(&store)));
        HealthRepository::new(store, journal)
    }

    fn aspirin(user_id: &str) -> NewMedicationSchedule {
        NewMedicationSchedule {
            user_id: user_id.into(),
            medication_name: "Aspirin".into(),
            dosage: "81mg".into(),
            frequency: "daily".into(),
            times: vec!["08:00".into()],
            instructions: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_list_by_user() {
        let repo = repo();
        repo.create_medication_schedule(aspirin("u1")).await.unwrap();
        repo.create_medication_schedule(aspirin("u2")).await.unwrap();

        assert_eq!(repo.medication_schedules("u1").await.unwrap().len(), 1);
        assert!(repo.medication_schedules("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_schedule_rejected() {
        let repo = repo();
        let mut input = aspirin("u1");
        input.times = vec!["25:00".into()];
        assert!(matches!(
            repo.create_medication_schedule(input).await,
            Err(StoreError::Validation(_))
        ));
        assert!(repo.load().await.unwrap().medication_schedules.is_empty());
    }

    #[tokio::test]
    async fn test_update_keeps_creation_time() {
        let repo = repo();
        let created = repo.create_medication_schedule(aspirin("u1")).await.unwrap();

        let mut changed = created.clone();
        changed.dosage = "100mg".into();
        changed.user_id = "someone-else".into();
        let updated = repo.update_medication_schedule(changed).await.unwrap();

        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.user_id, "u1");
        assert_eq!(repo.medication_schedules("u1").await.unwrap()[0].dosage, "100mg");
    }

    #[tokio::test]
    async fn test_delete_reports_whether_removed() {
        let repo = repo();
        let created = repo.create_medication_schedule(aspirin("u1")).await.unwrap();
        assert!(repo.delete_medication_schedule(&created.id).await.unwrap());
        assert!(!repo.delete_medication_schedule(&created.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_adherence_counts_orphans_separately() {
        let repo = repo();
        let kept = repo.create_medication_schedule(aspirin("u1")).await.unwrap();
        let dropped = repo.create_medication_schedule(aspirin("u1")).await.unwrap();

        repo.log_medication(&kept.id, now(), MedicationStatus::Taken).await.unwrap();
        repo.log_medication(&kept.id, now(), MedicationStatus::Missed).await.unwrap();
        repo.log_medication(&dropped.id, now(), MedicationStatus::Taken).await.unwrap();
        repo.delete_medication_schedule(&dropped.id).await.unwrap();

        let summary = repo.adherence("u1").await.unwrap();
        assert_eq!(summary.taken, 1);
        assert_eq!(summary.missed, 1);
        assert_eq!(summary.orphaned, 1);
        assert!((summary.rate() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_check_in_upserts_per_day() {
        let repo = repo();
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let first = repo.record_check_in("u1", day, 3, 3, None).await.unwrap();
        let second = repo
            .record_check_in("u1", day, 5, 4, Some("great walk".into()))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        let all = repo.check_ins("u1").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].mood, 5);
    }

    #[tokio::test]
    async fn test_check_in_scale_validated() {
        let repo = repo();
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert!(repo.record_check_in("u1", day, 0, 3, None).await.is_err());
        assert!(repo.record_check_in("u1", day, 3, 6, None).await.is_err());
    }
}
