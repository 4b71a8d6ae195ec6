//! Data models for the companion app's persisted aggregates
//!
//! Every aggregate is stored as one JSON document. Field names are camelCase to stay
//! compatible with blobs written by earlier app builds, and collection fields default to
//! empty so that partially-shaped legacy documents still load.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::{iso_millis, iso_millis_option, now};
use crate::utils::new_id;

/// Records carrying the instant used for retention pruning
pub trait Timestamped {
    /// Instant the record was created or logged
    fn timestamp(&self) -> DateTime<Utc>;
}

// ---------------------------------------------------------------------------
// Communication
// ---------------------------------------------------------------------------

/// A person the user keeps in touch with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    /// Unique identifier within the contact list
    pub id: String,
    /// Display name
    pub name: String,
    /// Phone number (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Email address (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Relationship to the user, e.g. "Daughter"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship: Option<String>,
    /// Shown on the emergency screen and alerted first
    #[serde(default)]
    pub is_emergency_contact: bool,
    /// Allowed to see daily check-ins and medication adherence
    #[serde(default)]
    pub can_view_health_status: bool,
    /// Creation time
    #[serde(with = "iso_millis")]
    pub created_at: DateTime<Utc>,
    /// Last modification time
    #[serde(with = "iso_millis")]
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    /// Create a contact with a fresh id and timestamps
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let at = now();
        Self {
            id: new_id(),
            name: name.into(),
            phone: None,
            email: None,
            relationship: None,
            is_emergency_contact: false,
            can_view_health_status: false,
            created_at: at,
            updated_at: at,
        }
    }

    /// Set the phone number
    #[must_use]
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    /// Set the email address
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Mark as an emergency contact
    #[must_use]
    pub const fn emergency(mut self) -> Self {
        self.is_emergency_contact = true;
        self
    }
}

/// A text message exchanged with a contact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique identifier
    pub id: String,
    /// Contact the message belongs to
    pub contact_id: String,
    /// Message body
    pub content: String,
    /// Sent by the user rather than received
    #[serde(default)]
    pub is_from_user: bool,
    /// Time sent or received
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
    /// Seen by the user
    #[serde(default)]
    pub is_read: bool,
}

/// Outcome of a video call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// Planned for later
    Scheduled,
    /// Took place
    Completed,
    /// Nobody answered
    Missed,
}

/// A video call with a contact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoCall {
    /// Unique identifier
    pub id: String,
    /// Contact called
    pub contact_id: String,
    /// Start (or scheduled start) time
    #[serde(with = "iso_millis")]
    pub started_at: DateTime<Utc>,
    /// End time, once finished
    #[serde(default, with = "iso_millis_option", skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Call outcome
    pub status: CallStatus,
}

/// Contacts, messages and calls, stored under `communication_data`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunicationData {
    /// Contact list; `id` is unique
    #[serde(default)]
    pub contacts: Vec<Contact>,
    /// Message history
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Call history
    #[serde(default)]
    pub video_calls: Vec<VideoCall>,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

const fn default_true() -> bool {
    true
}

/// A recurring medication reminder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicationSchedule {
    /// Unique identifier
    pub id: String,
    /// Owner of the schedule
    #[serde(default)]
    pub user_id: String,
    /// Medication name as entered by the user
    pub medication_name: String,
    /// Dose, e.g. "10mg"
    #[serde(default)]
    pub dosage: String,
    /// Free-form frequency, e.g. "twice daily"
    #[serde(default)]
    pub frequency: String,
    /// Reminder times as `HH:MM`
    #[serde(default)]
    pub times: Vec<String>,
    /// Reminders are currently enabled
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Extra instructions, e.g. "with food"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Creation time
    #[serde(with = "iso_millis")]
    pub created_at: DateTime<Utc>,
    /// Last modification time
    #[serde(with = "iso_millis")]
    pub updated_at: DateTime<Utc>,
}

/// Data for creating a new medication schedule
#[derive(Debug, Clone)]
pub struct NewMedicationSchedule {
    /// Owner of the schedule
    pub user_id: String,
    /// Medication name
    pub medication_name: String,
    /// Dose
    pub dosage: String,
    /// Free-form frequency
    pub frequency: String,
    /// Reminder times as `HH:MM`
    pub times: Vec<String>,
    /// Extra instructions
    pub instructions: Option<String>,
}

impl NewMedicationSchedule {
    /// Turn into a stored schedule with a fresh id and timestamps
    #[must_use]
    pub fn into_schedule(self) -> MedicationSchedule {
        let at = now();
        MedicationSchedule {
            id: new_id(),
            user_id: self.user_id,
            medication_name: self.medication_name.trim().to_string(),
            dosage: self.dosage,
            frequency: self.frequency,
            times: self.times,
            is_active: true,
            instructions: self.instructions,
            created_at: at,
            updated_at: at,
        }
    }
}

/// Whether a scheduled dose was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MedicationStatus {
    /// Dose taken
    Taken,
    /// Dose not taken and the window passed
    Missed,
    /// Deliberately skipped
    Skipped,
}

/// One dose event for a schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicationLog {
    /// Unique identifier
    pub id: String,
    /// Schedule this dose belongs to; may dangle after the schedule is deleted
    pub schedule_id: String,
    /// When the dose was due
    #[serde(with = "iso_millis")]
    pub scheduled_time: DateTime<Utc>,
    /// When the dose was actually taken
    #[serde(default, with = "iso_millis_option", skip_serializing_if = "Option::is_none")]
    pub taken_at: Option<DateTime<Utc>>,
    /// Outcome
    pub status: MedicationStatus,
    /// Free-form note
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Timestamped for MedicationLog {
    fn timestamp(&self) -> DateTime<Utc> {
        self.scheduled_time
    }
}

/// A daily wellbeing check-in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCheckIn {
    /// Unique identifier
    pub id: String,
    /// User checking in
    #[serde(default)]
    pub user_id: String,
    /// Calendar day of the check-in
    pub date: NaiveDate,
    /// Mood on a 1 to 5 scale
    pub mood: u8,
    /// Energy on a 1 to 5 scale
    pub energy_level: u8,
    /// Free-form note
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Creation time
    #[serde(with = "iso_millis")]
    pub created_at: DateTime<Utc>,
}

/// Check-ins, schedules and dose logs, stored under `health_data`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthData {
    /// Daily check-ins
    #[serde(default)]
    pub daily_check_ins: Vec<DailyCheckIn>,
    /// Medication schedules
    #[serde(default)]
    pub medication_schedules: Vec<MedicationSchedule>,
    /// Dose logs
    #[serde(default)]
    pub medication_logs: Vec<MedicationLog>,
}

/// Dose outcome counts for a user's schedules
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdherenceSummary {
    /// Doses taken
    pub taken: usize,
    /// Doses missed
    pub missed: usize,
    /// Doses skipped
    pub skipped: usize,
    /// Logs whose schedule no longer exists
    pub orphaned: usize,
}

impl AdherenceSummary {
    /// Share of recorded doses that were taken, 0.0 when nothing is recorded
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn rate(&self) -> f64 {
        let total = self.taken + self.missed + self.skipped;
        if total == 0 {
            0.0
        } else {
            self.taken as f64 / total as f64
        }
    }
}

// ---------------------------------------------------------------------------
// Community
// ---------------------------------------------------------------------------

/// A local service such as a senior center or meal delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityResource {
    /// Unique identifier
    pub id: String,
    /// Resource name
    pub name: String,
    /// Category, e.g. "transport"
    #[serde(default)]
    pub category: String,
    /// Short description
    #[serde(default)]
    pub description: String,
    /// Contact phone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Street address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Web address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

/// A community event the user may attend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityEvent {
    /// Unique identifier
    pub id: String,
    /// Event title
    pub title: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Where it takes place
    #[serde(default)]
    pub location: String,
    /// Start time
    #[serde(with = "iso_millis")]
    pub starts_at: DateTime<Utc>,
    /// End time
    #[serde(default, with = "iso_millis_option", skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
}

/// A plain activity such as a walk or a class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// Unique identifier
    pub id: String,
    /// Title
    pub title: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Category, e.g. "exercise"
    #[serde(default)]
    pub category: String,
    /// Planned time
    #[serde(default, with = "iso_millis_option", skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Planned length in minutes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    /// Done
    #[serde(default)]
    pub completed: bool,
    /// Creation time
    #[serde(with = "iso_millis")]
    pub created_at: DateTime<Utc>,
}

/// One step of the user's daily routine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutineItem {
    /// Unique identifier
    pub id: String,
    /// Title, e.g. "Morning walk"
    pub title: String,
    /// Time of day as `HH:MM`
    pub time_of_day: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Done today
    #[serde(default)]
    pub completed: bool,
    /// When it was last completed
    #[serde(default, with = "iso_millis_option", skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Position in the routine list
    #[serde(default)]
    pub order: u32,
    /// Creation time
    #[serde(with = "iso_millis")]
    pub created_at: DateTime<Utc>,
}

/// A milestone the user can unlock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Achievement {
    /// Unique identifier
    pub id: String,
    /// Title
    pub title: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// Progress needed to unlock
    #[serde(default)]
    pub target: u32,
    /// Progress so far
    #[serde(default)]
    pub progress: u32,
    /// When it was unlocked
    #[serde(default, with = "iso_millis_option", skip_serializing_if = "Option::is_none")]
    pub unlocked_at: Option<DateTime<Utc>>,
    /// Creation time
    #[serde(with = "iso_millis")]
    pub created_at: DateTime<Utc>,
}

impl Achievement {
    /// Unlocked already
    #[must_use]
    pub const fn is_unlocked(&self) -> bool {
        self.unlocked_at.is_some()
    }
}

/// Which routine items were completed on one day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    /// Unique identifier
    pub id: String,
    /// Calendar day
    pub date: NaiveDate,
    /// Routine items completed that day
    #[serde(default)]
    pub completed_routine_ids: Vec<String>,
    /// Routine size that day
    #[serde(default)]
    pub total_routines: u32,
    /// Last modification time
    #[serde(with = "iso_millis")]
    pub updated_at: DateTime<Utc>,
}

/// Record kinds sharing the `activities` collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    /// Plain activity
    Activity,
    /// Routine item
    Routine,
    /// Achievement
    Achievement,
    /// Daily routine progress
    Progress,
}

/// An entry of `CommunityData.activities`, discriminated by an explicit `kind` field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ActivityRecord {
    /// Plain activity
    Activity(Activity),
    /// Routine item
    Routine(RoutineItem),
    /// Achievement
    Achievement(Achievement),
    /// Daily routine progress
    Progress(ProgressRecord),
}

impl ActivityRecord {
    /// Identifier, unique within the collection
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Activity(a) => &a.id,
            Self::Routine(r) => &r.id,
            Self::Achievement(a) => &a.id,
            Self::Progress(p) => &p.id,
        }
    }

    /// Record kind
    #[must_use]
    pub const fn kind(&self) -> ActivityKind {
        match self {
            Self::Activity(_) => ActivityKind::Activity,
            Self::Routine(_) => ActivityKind::Routine,
            Self::Achievement(_) => ActivityKind::Achievement,
            Self::Progress(_) => ActivityKind::Progress,
        }
    }
}

/// Resources, activities and events, stored under `community_data`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityData {
    /// Local resources
    #[serde(default)]
    pub resources: Vec<CommunityResource>,
    /// Activities, routines, achievements and progress records
    #[serde(default, deserialize_with = "crate::migration::deserialize_activities")]
    pub activities: Vec<ActivityRecord>,
    /// Upcoming events
    #[serde(default)]
    pub events: Vec<CommunityEvent>,
}

// ---------------------------------------------------------------------------
// Privacy
// ---------------------------------------------------------------------------

/// One kind of data a family member may see
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SharingFlag {
    /// Check-ins and overall status
    HealthStatus,
    /// Schedules and adherence
    Medications,
    /// Approximate location
    Location,
    /// Routine and activity progress
    Activities,
    /// Emergency notifications
    EmergencyAlerts,
}

/// The set of data kinds shared with one family member
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataSharingPermissions {
    /// Check-ins and overall status
    pub health_status: bool,
    /// Schedules and adherence
    pub medications: bool,
    /// Approximate location
    pub location: bool,
    /// Routine and activity progress
    pub activities: bool,
    /// Emergency notifications
    pub emergency_alerts: bool,
}

impl DataSharingPermissions {
    /// Everything shared
    #[must_use]
    pub const fn all() -> Self {
        Self {
            health_status: true,
            medications: true,
            location: true,
            activities: true,
            emergency_alerts: true,
        }
    }

    /// Whether `flag` is granted
    #[must_use]
    pub const fn allows(&self, flag: SharingFlag) -> bool {
        match flag {
            SharingFlag::HealthStatus => self.health_status,
            SharingFlag::Medications => self.medications,
            SharingFlag::Location => self.location,
            SharingFlag::Activities => self.activities,
            SharingFlag::EmergencyAlerts => self.emergency_alerts,
        }
    }
}

/// Access granted to one family member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FamilyAccessPermission {
    /// Unique identifier of the grant
    pub id: String,
    /// Family member the grant is for
    pub family_member_id: String,
    /// Display name of the family member
    pub family_member_name: String,
    /// Relationship to the user
    #[serde(default)]
    pub relationship: String,
    /// What is shared
    #[serde(default)]
    pub permissions: DataSharingPermissions,
    /// When access was first granted
    #[serde(with = "iso_millis")]
    pub granted_at: DateTime<Utc>,
    /// Last change to the grant
    #[serde(with = "iso_millis")]
    pub updated_at: DateTime<Utc>,
    /// Grant stops applying after this instant
    #[serde(default, with = "iso_millis_option", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl FamilyAccessPermission {
    /// Whether the grant has lapsed at `at`
    #[must_use]
    pub fn is_expired(&self, at: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= at)
    }
}

/// Default retention window for logs and reports
pub const DEFAULT_RETENTION_DAYS: u32 = 365;

/// Privacy preferences, stored under `privacy_settings`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrivacySettings {
    /// Logs and reports older than this many days are pruned
    pub data_retention_days: u32,
    /// Per-family-member grants
    pub family_access: Vec<FamilyAccessPermission>,
    /// Local data encryption requested
    pub encryption_enabled: bool,
    /// Biometric unlock requested
    pub biometric_auth_enabled: bool,
    /// Crash reports may be stored
    pub crash_reporting_enabled: bool,
    /// Anonymous usage analytics allowed
    pub analytics_enabled: bool,
    /// Last modification time
    #[serde(with = "iso_millis_option", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            data_retention_days: DEFAULT_RETENTION_DAYS,
            family_access: Vec::new(),
            encryption_enabled: true,
            biometric_auth_enabled: false,
            crash_reporting_enabled: true,
            analytics_enabled: false,
            updated_at: None,
        }
    }
}

/// A privacy-relevant action, kept under `privacy_audit_log`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacyAuditEntry {
    /// Unique identifier
    pub id: String,
    /// When it happened
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
    /// Short action name, e.g. "family_access_granted"
    pub action: String,
    /// Sanitized details
    #[serde(default)]
    pub details: String,
}

impl Timestamped for PrivacyAuditEntry {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

// ---------------------------------------------------------------------------
// Crash reports and push tokens
// ---------------------------------------------------------------------------

/// A sanitized error report, kept under `crash_reports`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrashReport {
    /// Unique identifier
    pub id: String,
    /// When the error happened
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
    /// Error class, e.g. "StorageError"
    pub error_type: String,
    /// Sanitized message
    pub message: String,
    /// Sanitized stack trace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Hashed user identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Happened on an emergency flow
    #[serde(default)]
    pub is_emergency_related: bool,
    /// App build that produced the report
    #[serde(default)]
    pub app_version: String,
}

impl Timestamped for CrashReport {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// A device registration for reminders, kept under `push_tokens`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushToken {
    /// Opaque token from the platform; unique
    pub token: String,
    /// Platform name, e.g. "ios"
    pub platform: String,
    /// Registration time
    #[serde(with = "iso_millis")]
    pub registered_at: DateTime<Utc>,
}
