//! Community aggregate and the record kinds sharing its `activities` collection.
//!
//! Routines, achievements and daily progress live next to plain activities in one list.
//! The sub-repositories only ever look at records of their own `kind`.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info};

use super::BlobRepository;
use crate::codec::now;
use crate::error::{Result, StoreError};
use crate::models::{
    Achievement, Activity, ActivityRecord, CommunityData, CommunityEvent, CommunityResource, ProgressRecord,
    RoutineItem,
};
use crate::storage::KeyValueStore;
use crate::sync::ChangeJournal;
use crate::utils::new_id;
use crate::validation::InputValidator;

/// Resources, events and the shared `activities` collection
#[derive(Clone)]
pub struct CommunityRepository {
    blobs: BlobRepository<CommunityData>,
}

impl CommunityRepository {
    /// Create a repository over `store`
    pub fn new(store: Arc<dyn KeyValueStore>, journal: Arc<ChangeJournal>) -> Self {
        Self {
            blobs: BlobRepository::new(store, journal),
        }
    }

    /// Whole aggregate. Legacy records without `kind` are classified while decoding.
    pub async fn load(&self) -> Result<CommunityData> {
        self.blobs.load().await
    }

    /// Replace the whole aggregate
    pub async fn save(&self, data: &CommunityData) -> Result<()> {
        self.blobs.save(data).await
    }

    /// Every record in `activities`, whatever its kind
    pub async fn records(&self) -> Result<Vec<ActivityRecord>> {
        Ok(self.load().await?.activities)
    }

    /// Plain activities only
    pub async fn activities(&self) -> Result<Vec<Activity>> {
        Ok(self
            .records()
            .await?
            .into_iter()
            .filter_map(|record| match record {
                ActivityRecord::Activity(activity) => Some(activity),
                _ => None,
            })
            .collect())
    }

    /// Insert or replace a plain activity by id
    pub async fn upsert_activity(&self, activity: Activity) -> Result<Activity> {
        if activity.title.trim().is_empty() {
            return Err(StoreError::Validation("Activity title cannot be empty".into()));
        }
        self.upsert_record(ActivityRecord::Activity(activity.clone())).await?;
        Ok(activity)
    }

    /// Remove the record with `id`, whatever its kind
    pub async fn remove_activity(&self, id: &str) -> Result<bool> {
        if !self.records().await?.iter().any(|r| r.id() == id) {
            return Ok(false);
        }
        self.blobs
            .update(|data| {
                let before = data.activities.len();
                data.activities.retain(|r| r.id() != id);
                Ok(data.activities.len() != before)
            })
            .await
    }

    /// Local resources
    pub async fn resources(&self) -> Result<Vec<CommunityResource>> {
        Ok(self.load().await?.resources)
    }

    /// Events starting at or after `from`, soonest first
    pub async fn events(&self, from: DateTime<Utc>) -> Result<Vec<CommunityEvent>> {
        let mut events: Vec<CommunityEvent> = self
            .load()
            .await?
            .events
            .into_iter()
            .filter(|e| e.starts_at >= from)
            .collect();
        events.sort_by_key(|e| e.starts_at);
        Ok(events)
    }

    async fn upsert_record(&self, record: ActivityRecord) -> Result<()> {
        self.blobs
            .update(move |data| {
                match data.activities.iter_mut().find(|r| r.id() == record.id()) {
                    Some(existing) => *existing = record,
                    None => data.activities.push(record),
                }
                Ok(())
            })
            .await
    }
}

fn routines_in(data: &CommunityData) -> Vec<RoutineItem> {
    let mut routines: Vec<RoutineItem> = data
        .activities
        .iter()
        .filter_map(|record| match record {
            ActivityRecord::Routine(routine) => Some(routine.clone()),
            _ => None,
        })
        .collect();
    routines.sort_by_key(|r| r.order);
    routines
}

fn routine_mut<'a>(data: &'a mut CommunityData, id: &str) -> Result<&'a mut RoutineItem> {
    data.activities
        .iter_mut()
        .find_map(|record| match record {
            ActivityRecord::Routine(routine) if routine.id == id => Some(routine),
            _ => None,
        })
        .ok_or_else(|| StoreError::NotFound(format!("routine {id}")))
}

fn default_routines() -> Vec<RoutineItem> {
    let at = now();
    [
        ("Morning medication", "08:00", "Take your morning medication"),
        ("Breakfast", "08:30", "Have a healthy breakfast"),
        ("Morning walk", "10:00", "A short walk outside"),
        ("Call family", "15:00", "Check in with a family member"),
        ("Evening medication", "20:00", "Take your evening medication"),
    ]
    .into_iter()
    .zip(0..)
    .map(|((title, time_of_day, description), order)| RoutineItem {
        id: new_id(),
        title: title.into(),
        time_of_day: time_of_day.into(),
        description: description.into(),
        completed: false,
        completed_at: None,
        order,
        created_at: at,
    })
    .collect()
}

/// The user's daily routine
#[derive(Clone)]
pub struct RoutineRepository {
    blobs: BlobRepository<CommunityData>,
}

impl RoutineRepository {
    /// Create a repository over `store`
    pub fn new(store: Arc<dyn KeyValueStore>, journal: Arc<ChangeJournal>) -> Self {
        Self {
            blobs: BlobRepository::new(store, journal),
        }
    }

    /// Routine items in display order. The default routine is written the first time
    /// no routine items exist.
    pub async fn routines(&self) -> Result<Vec<RoutineItem>> {
        let data = self.blobs.load().await?;
        let routines = routines_in(&data);
        if !routines.is_empty() {
            return Ok(routines);
        }

        let seeded = self
            .blobs
            .update(|data| {
                let existing = routines_in(data);
                if !existing.is_empty() {
                    return Ok(existing);
                }
                let defaults = default_routines();
                data.activities
                    .extend(defaults.iter().cloned().map(ActivityRecord::Routine));
                Ok(defaults)
            })
            .await?;
        info!(count = seeded.len(), "seeded default routine");
        Ok(seeded)
    }

    /// Mark a routine item done or not done
    pub async fn set_routine_completed(&self, id: &str, completed: bool) -> Result<RoutineItem> {
        self.blobs
            .update(|data| {
                let routine = routine_mut(data, id)?;
                routine.completed = completed;
                routine.completed_at = completed.then(now);
                Ok(routine.clone())
            })
            .await
    }

    /// Append a routine item after the existing ones
    pub async fn add_routine(&self, title: &str, time_of_day: &str, description: &str) -> Result<RoutineItem> {
        let title = InputValidator::sanitize_input(title);
        if title.is_empty() {
            return Err(StoreError::Validation("Routine title cannot be empty".into()));
        }
        InputValidator::validate_time_of_day(time_of_day)?;

        let mut routine = RoutineItem {
            id: new_id(),
            title,
            time_of_day: time_of_day.to_string(),
            description: InputValidator::sanitize_input(description),
            completed: false,
            completed_at: None,
            order: 0,
            created_at: now(),
        };

        self.blobs
            .update(move |data| {
                routine.order = routines_in(data).last().map_or(0, |last| last.order + 1);
                data.activities.push(ActivityRecord::Routine(routine.clone()));
                Ok(routine)
            })
            .await
    }

    /// Remove a routine item
    pub async fn remove_routine(&self, id: &str) -> Result<bool> {
        let data = self.blobs.load().await?;
        if !routines_in(&data).iter().any(|r| r.id == id) {
            return Ok(false);
        }
        self.blobs
            .update(|data| {
                data.activities
                    .retain(|r| !matches!(r, ActivityRecord::Routine(routine) if routine.id == id));
                Ok(true)
            })
            .await
    }
}

fn achievements_in(data: &CommunityData) -> Vec<Achievement> {
    data.activities
        .iter()
        .filter_map(|record| match record {
            ActivityRecord::Achievement(achievement) => Some(achievement.clone()),
            _ => None,
        })
        .collect()
}

fn achievement_mut<'a>(data: &'a mut CommunityData, id: &str) -> Result<&'a mut Achievement> {
    data.activities
        .iter_mut()
        .find_map(|record| match record {
            ActivityRecord::Achievement(achievement) if achievement.id == id => Some(achievement),
            _ => None,
        })
        .ok_or_else(|| StoreError::NotFound(format!("achievement {id}")))
}

fn default_achievements() -> Vec<Achievement> {
    let at = now();
    [
        ("First check-in", "Complete your first daily check-in", 1),
        ("Routine week", "Finish your routine seven days running", 7),
        ("Stay connected", "Send ten messages to family and friends", 10),
        ("Medication streak", "Take every dose for thirty days", 30),
    ]
    .into_iter()
    .map(|(title, description, target)| Achievement {
        id: new_id(),
        title: title.into(),
        description: description.into(),
        target,
        progress: 0,
        unlocked_at: None,
        created_at: at,
    })
    .collect()
}

/// Milestones the user can unlock
#[derive(Clone)]
pub struct AchievementRepository {
    blobs: BlobRepository<CommunityData>,
}

impl AchievementRepository {
    /// Create a repository over `store`
    pub fn new(store: Arc<dyn KeyValueStore>, journal: Arc<ChangeJournal>) -> Self {
        Self {
            blobs: BlobRepository::new(store, journal),
        }
    }

    /// All achievements. Defaults are written the first time none exist.
    pub async fn achievements(&self) -> Result<Vec<Achievement>> {
        let existing = achievements_in(&self.blobs.load().await?);
        if !existing.is_empty() {
            return Ok(existing);
        }

        self.blobs
            .update(|data| {
                let existing = achievements_in(data);
                if !existing.is_empty() {
                    return Ok(existing);
                }
                let defaults = default_achievements();
                data.activities
                    .extend(defaults.iter().cloned().map(ActivityRecord::Achievement));
                Ok(defaults)
            })
            .await
    }

    /// Unlock now. Unlocking twice keeps the first unlock time.
    pub async fn unlock(&self, id: &str) -> Result<Achievement> {
        self.blobs
            .update(|data| {
                let achievement = achievement_mut(data, id)?;
                if achievement.unlocked_at.is_none() {
                    achievement.progress = achievement.progress.max(achievement.target);
                    achievement.unlocked_at = Some(now());
                    info!(achievement = %achievement.title, "achievement unlocked");
                }
                Ok(achievement.clone())
            })
            .await
    }

    /// Add `amount` to the progress, unlocking once the target is reached
    pub async fn increment_progress(&self, id: &str, amount: u32) -> Result<Achievement> {
        self.blobs
            .update(|data| {
                let achievement = achievement_mut(data, id)?;
                achievement.progress = achievement.progress.saturating_add(amount);
                if achievement.unlocked_at.is_none() && achievement.progress >= achievement.target {
                    achievement.unlocked_at = Some(now());
                    info!(achievement = %achievement.title, "achievement unlocked");
                }
                Ok(achievement.clone())
            })
            .await
    }
}

/// Day-by-day routine completion
#[derive(Clone)]
pub struct ProgressRepository {
    blobs: BlobRepository<CommunityData>,
}

impl ProgressRepository {
    /// Create a repository over `store`
    pub fn new(store: Arc<dyn KeyValueStore>, journal: Arc<ChangeJournal>) -> Self {
        Self {
            blobs: BlobRepository::new(store, journal),
        }
    }

    /// Store which routine items were completed on `date`, replacing an earlier record
    pub async fn record_progress(&self, date: NaiveDate, completed_ids: Vec<String>) -> Result<ProgressRecord> {
        self.blobs
            .update(move |data| {
                let total_routines = u32::try_from(routines_in(data).len()).unwrap_or(u32::MAX);
                let existing = data.activities.iter_mut().find_map(|record| match record {
                    ActivityRecord::Progress(progress) if progress.date == date => Some(progress),
                    _ => None,
                });

                match existing {
                    Some(progress) => {
                        progress.completed_routine_ids = completed_ids;
                        progress.total_routines = total_routines;
                        progress.updated_at = now();
                        Ok(progress.clone())
                    },
                    None => {
                        let progress = ProgressRecord {
                            id: new_id(),
                            date,
                            completed_routine_ids: completed_ids,
                            total_routines,
                            updated_at: now(),
                        };
                        debug!(%date, "new progress record");
                        data.activities.push(ActivityRecord::Progress(progress.clone()));
                        Ok(progress)
                    },
                }
            })
            .await
    }

    /// Progress recorded for `date`, if any
    pub async fn progress_for(&self, date: NaiveDate) -> Result<Option<ProgressRecord>> {
        Ok(self
            .blobs
            .load()
            .await?
            .activities
            .into_iter()
            .find_map(|record| match record {
                ActivityRecord::Progress(progress) if progress.date == date => Some(progress),
                _ => None,
            }))
    }
}
