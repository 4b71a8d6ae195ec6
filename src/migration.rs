//! Legacy `activities` records.
//!
//! Older builds stored routines, achievements and daily progress as plain activities,
//! told apart by a title prefix and an extra data field. Those records carry no `kind`.
//! They are classified while decoding, and [`migrate_community_data`] rewrites the blob
//! once so every stored record has an explicit `kind`.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{info, warn};

use crate::codec::{iso_millis_option, now};
use crate::error::Result;
use crate::models::{Achievement, Activity, ActivityRecord, CommunityData, ProgressRecord, RoutineItem};
use crate::repository::{keys, BlobRepository};
use crate::storage::{KeyValueStore, Namespace};
use crate::sync::ChangeJournal;

const ROUTINE_PREFIX: &str = "Routine:";
const ACHIEVEMENT_PREFIX: &str = "Achievement:";
const PROGRESS_PREFIX: &str = "Daily Routine:";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyRecord {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    category: String,
    #[serde(default, with = "iso_millis_option")]
    scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    duration_minutes: Option<u32>,
    #[serde(default)]
    completed: bool,
    #[serde(default, with = "iso_millis_option")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    routine_data: Option<Value>,
    #[serde(default)]
    achievement_data: Option<Value>,
    #[serde(default)]
    progress_id: Option<Value>,
    #[serde(default)]
    date: Option<NaiveDate>,
    #[serde(default)]
    completed_routine_ids: Vec<String>,
    #[serde(default)]
    total_routines: u32,
    #[serde(default, with = "iso_millis_option")]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyRoutineData {
    time_of_day: String,
    #[serde(default)]
    completed: bool,
    #[serde(default, with = "iso_millis_option")]
    completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    order: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyAchievementData {
    target: u32,
    #[serde(default)]
    progress: u32,
    #[serde(default, with = "iso_millis_option")]
    unlocked_at: Option<DateTime<Utc>>,
}

/// Older clients generated ids with `Date.now()` and stored them as numbers
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(id) => id,
        RawId::Number(id) => id.to_string(),
    })
}

/// Routine and achievement payloads were written as JSON text inside the record;
/// some builds stored the object directly. Both are accepted.
fn parse_sideband<T: DeserializeOwned>(raw: Value) -> serde_json::Result<T> {
    match raw {
        Value::String(text) => serde_json::from_str(&text),
        other => serde_json::from_value(other),
    }
}

fn strip_prefix(title: &str, prefix: &str) -> String {
    title.strip_prefix(prefix).unwrap_or(title).trim().to_string()
}

impl LegacyRecord {
    fn created(&self) -> DateTime<Utc> {
        self.created_at.unwrap_or_else(now)
    }

    fn into_activity(self) -> Activity {
        let created_at = self.created();
        Activity {
            id: self.id,
            title: self.title,
            description: self.description,
            category: self.category,
            scheduled_at: self.scheduled_at,
            duration_minutes: self.duration_minutes,
            completed: self.completed,
            created_at,
        }
    }

    fn into_routine(self, data: LegacyRoutineData) -> RoutineItem {
        let created_at = self.created();
        RoutineItem {
            title: strip_prefix(&self.title, ROUTINE_PREFIX),
            id: self.id,
            time_of_day: data.time_of_day,
            description: self.description,
            completed: data.completed,
            completed_at: data.completed_at,
            order: data.order,
            created_at,
        }
    }

    fn into_achievement(self, data: LegacyAchievementData) -> Achievement {
        let created_at = self.created();
        Achievement {
            title: strip_prefix(&self.title, ACHIEVEMENT_PREFIX),
            id: self.id,
            description: self.description,
            target: data.target,
            progress: data.progress,
            unlocked_at: data.unlocked_at,
            created_at,
        }
    }

    /// Day the progress record belongs to: explicit `date`, else the title suffix,
    /// else the scheduled or creation day
    fn progress_date(&self) -> Option<NaiveDate> {
        self.date
            .or_else(|| {
                let suffix = strip_prefix(&self.title, PROGRESS_PREFIX);
                NaiveDate::parse_from_str(&suffix, "%Y-%m-%d").ok()
            })
            .or_else(|| self.scheduled_at.or(self.created_at).map(|at| at.date_naive()))
    }

    fn into_progress(self, date: NaiveDate) -> ProgressRecord {
        let updated_at = self.updated_at.unwrap_or_else(|| self.created());
        ProgressRecord {
            id: self.id,
            date,
            completed_routine_ids: self.completed_routine_ids,
            total_routines: self.total_routines,
            updated_at,
        }
    }
}

/// Classify a record written without `kind`.
///
/// A prefix without its data field is a plain activity. A data field that does not
/// parse keeps the record as a plain activity as well.
fn infer_kind(record: LegacyRecord) -> ActivityRecord {
    if record.progress_id.is_some() || record.title.starts_with(PROGRESS_PREFIX) {
        return match record.progress_date() {
            Some(date) => ActivityRecord::Progress(record.into_progress(date)),
            None => {
                warn!(id = %record.id, "legacy progress record has no date, keeping as activity");
                ActivityRecord::Activity(record.into_activity())
            },
        };
    }

    if record.title.starts_with(ROUTINE_PREFIX) {
        if let Some(raw) = record.routine_data.clone() {
            return match parse_sideband::<LegacyRoutineData>(raw) {
                Ok(data) => ActivityRecord::Routine(record.into_routine(data)),
                Err(e) => {
                    warn!(id = %record.id, error = %e, "malformed routineData, keeping as activity");
                    ActivityRecord::Activity(record.into_activity())
                },
            };
        }
    }

    if record.title.starts_with(ACHIEVEMENT_PREFIX) {
        if let Some(raw) = record.achievement_data.clone() {
            return match parse_sideband::<LegacyAchievementData>(raw) {
                Ok(data) => ActivityRecord::Achievement(record.into_achievement(data)),
                Err(e) => {
                    warn!(id = %record.id, error = %e, "malformed achievementData, keeping as activity");
                    ActivityRecord::Activity(record.into_activity())
                },
            };
        }
    }

    ActivityRecord::Activity(record.into_activity())
}

fn has_kind(value: &Value) -> bool {
    value.get("kind").is_some()
}

/// Decode one stored record, tagged or legacy
pub fn classify_record(value: Value) -> std::result::Result<ActivityRecord, serde_json::Error> {
    if has_kind(&value) {
        serde_json::from_value(value)
    } else {
        serde_json::from_value::<LegacyRecord>(value).map(infer_kind)
    }
}

/// Deserialize `CommunityData.activities`, accepting legacy records.
///
/// Records that cannot be read at all are skipped with a warning instead of failing
/// the whole aggregate.
pub fn deserialize_activities<'de, D>(deserializer: D) -> std::result::Result<Vec<ActivityRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match classify_record(value) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(index, error = %e, "skipping unreadable activity record");
                None
            },
        })
        .collect())
}

/// Whether a stored `community_data` blob still holds records without `kind`.
/// Unparseable blobs report `false`; the repository handles those.
#[must_use]
pub fn needs_migration(raw: &str) -> bool {
    serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|doc| doc.get("activities").and_then(Value::as_array).cloned())
        .is_some_and(|records| records.iter().any(|r| !has_kind(r)))
}

/// Outcome of [`migrate_community_data`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Records found in the stored blob
    pub records_found: usize,
    /// Records that had no `kind`
    pub legacy_records: usize,
    /// Records dropped because they could not be read. The original blob is kept
    /// under [`keys::corrupt_backup`] when this is non-zero.
    pub skipped: usize,
    /// Whether the blob was rewritten
    pub rewritten: bool,
}

/// Rewrite `community_data` so every record carries an explicit `kind`.
///
/// Running it on an already migrated or missing blob writes nothing.
pub async fn migrate_community_data(
    store: Arc<dyn KeyValueStore>,
    journal: Arc<ChangeJournal>,
) -> Result<MigrationReport> {
    let Some(raw) = store.get(Namespace::Standard, keys::COMMUNITY_DATA).await? else {
        return Ok(MigrationReport::default());
    };

    let records: Vec<Value> = serde_json::from_str::<Value>(&raw)
        .ok()
        .and_then(|doc| doc.get("activities").and_then(Value::as_array).cloned())
        .unwrap_or_default();
    let mut report = MigrationReport {
        records_found: records.len(),
        legacy_records: records.iter().filter(|r| !has_kind(r)).count(),
        ..MigrationReport::default()
    };

    if !needs_migration(&raw) {
        return Ok(report);
    }

    let repo = BlobRepository::<CommunityData>::new(store, journal);
    let data = repo.load().await?;
    repo.save(&data).await?;

    report.skipped = report.records_found.saturating_sub(data.activities.len());
    report.rewritten = true;
    info!(
        legacy = report.legacy_records,
        skipped = report.skipped,
        "community data migrated to tagged records"
    );
    Ok(report)
}
