//! Round-trip and legacy-format tests for the record codec

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;

use companion_store::codec::{decode, encode, format_timestamp};
use companion_store::models::{
    Activity, ActivityRecord, Contact, DailyCheckIn, MedicationLog, MedicationSchedule, MedicationStatus,
    RoutineItem,
};

fn millis_timestamp() -> impl Strategy<Value = DateTime<Utc>> {
    // 2000-01-01 .. 2100-01-01, millisecond resolution
    (946_684_800_000_i64..4_102_444_800_000_i64)
        .prop_map(|ms| DateTime::from_timestamp_millis(ms).expect("in range"))
}

fn optional_text() -> impl Strategy<Value = Option<String>> {
    prop::option::of("[a-zA-Z0-9 .,'-]{0,40}")
}

prop_compose! {
    fn contact()(
        id in "[a-f0-9]{8}",
        name in "[A-Za-z][A-Za-z '-]{0,30}",
        phone in optional_text(),
        email in optional_text(),
        is_emergency_contact in any::<bool>(),
        created_at in millis_timestamp(),
        updated_at in millis_timestamp(),
    ) -> Contact {
        Contact {
            id,
            name,
            phone,
            email,
            relationship: None,
            is_emergency_contact,
            can_view_health_status: false,
            created_at,
            updated_at,
        }
    }
}

prop_compose! {
    fn schedule()(
        id in "[a-f0-9]{8}",
        medication_name in "[A-Za-z ]{1,20}",
        times in prop::collection::vec("[0-2][0-9]:[0-5][0-9]", 1..4),
        is_active in any::<bool>(),
        instructions in optional_text(),
        created_at in millis_timestamp(),
    ) -> MedicationSchedule {
        MedicationSchedule {
            id,
            user_id: "u1".into(),
            medication_name,
            dosage: "10mg".into(),
            frequency: "daily".into(),
            times,
            is_active,
            instructions,
            created_at,
            updated_at: created_at,
        }
    }
}

prop_compose! {
    fn medication_log()(
        id in "[a-f0-9]{8}",
        scheduled_time in millis_timestamp(),
        taken_at in prop::option::of(millis_timestamp()),
        status in prop_oneof![
            Just(MedicationStatus::Taken),
            Just(MedicationStatus::Missed),
            Just(MedicationStatus::Skipped),
        ],
        notes in optional_text(),
    ) -> MedicationLog {
        MedicationLog {
            id,
            schedule_id: "s1".into(),
            scheduled_time,
            taken_at,
            status,
            notes,
        }
    }
}

prop_compose! {
    fn activity_record()(
        id in "[a-f0-9]{8}",
        title in "[A-Za-z: ]{1,30}",
        created_at in millis_timestamp(),
        completed_at in prop::option::of(millis_timestamp()),
        routine in any::<bool>(),
    ) -> ActivityRecord {
        if routine {
            ActivityRecord::Routine(RoutineItem {
                id,
                title,
                time_of_day: "08:00".into(),
                description: String::new(),
                completed: completed_at.is_some(),
                completed_at,
                order: 0,
                created_at,
            })
        } else {
            ActivityRecord::Activity(Activity {
                id,
                title,
                description: String::new(),
                category: "social".into(),
                scheduled_at: completed_at,
                duration_minutes: None,
                completed: false,
                created_at,
            })
        }
    }
}

proptest! {
    #[test]
    fn contact_round_trips(record in contact()) {
        let raw = encode(&record).unwrap();
        prop_assert_eq!(decode::<Contact>("test", &raw).unwrap(), record);
    }

    #[test]
    fn schedule_round_trips(record in schedule()) {
        let raw = encode(&record).unwrap();
        prop_assert_eq!(decode::<MedicationSchedule>("test", &raw).unwrap(), record);
    }

    #[test]
    fn medication_log_round_trips(record in medication_log()) {
        let raw = encode(&record).unwrap();
        prop_assert_eq!(decode::<MedicationLog>("test", &raw).unwrap(), record);
    }

    #[test]
    fn activity_record_round_trips(record in activity_record()) {
        let raw = encode(&record).unwrap();
        prop_assert!(raw.contains("\"kind\""));
        prop_assert_eq!(decode::<ActivityRecord>("test", &raw).unwrap(), record);
    }
}

#[test]
fn test_timestamps_written_with_millis_and_z() {
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 15).unwrap();
    assert_eq!(format_timestamp(&at), "2024-03-01T08:30:15.000Z");
}

#[test]
fn test_legacy_epoch_millis_accepted() {
    let raw = r#"{"id":"c1","name":"Alice","createdAt":1709281815000,"updatedAt":"2024-03-01T08:30:15"}"#;
    let contact: Contact = decode("communication_data", raw).expect("legacy contact decodes");
    let expected = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 15).unwrap();
    assert_eq!(contact.created_at, expected);
    assert_eq!(contact.updated_at, expected);
}

#[test]
fn test_check_in_date_is_plain_day() {
    let check_in = DailyCheckIn {
        id: "c1".into(),
        user_id: "u1".into(),
        date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        mood: 4,
        energy_level: 3,
        notes: None,
        created_at: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
    };
    let raw = encode(&check_in).unwrap();
    assert!(raw.contains(r#""date":"2024-03-01""#));
    assert!(raw.contains(r#""energyLevel":3"#));
}

#[test]
fn test_decode_error_names_the_key() {
    let err = decode::<Contact>("communication_data", "{not json").unwrap_err();
    assert_eq!(err.key, "communication_data");
    assert!(err.to_string().contains("communication_data"));
}
