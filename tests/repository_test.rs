//! Repository behavior against a real sled store

use std::sync::Arc;

use tempfile::tempdir;

use companion_store::models::{Contact, MedicationStatus, NewMedicationSchedule};
use companion_store::repository::keys;
use companion_store::sync::SimulatedBackend;
use companion_store::{AppConfig, CompanionServices, KeyValueStore, MemoryStore, Namespace, SledStore};

fn services_over(store: Arc<dyn KeyValueStore>) -> CompanionServices {
    CompanionServices::with_store(store, Arc::new(SimulatedBackend::default()), AppConfig::default())
}

fn aspirin() -> NewMedicationSchedule {
    NewMedicationSchedule {
        user_id: "u1".into(),
        medication_name: "Aspirin".into(),
        dosage: "81mg".into(),
        frequency: "daily".into(),
        times: vec!["08:00".into(), "20:00".into()],
        instructions: Some("with food".into()),
    }
}

#[tokio::test]
async fn test_data_survives_service_restart() {
    let temp_dir = tempdir().expect("Failed to create temp directory");
    let store: Arc<dyn KeyValueStore> =
        Arc::new(SledStore::open(temp_dir.path().join("store"), true).expect("Failed to open store"));

    {
        let services = services_over(Arc::clone(&store));
        services
            .communication
            .save_contact(Contact::new("Alice").with_phone("555-123-4567").emergency())
            .await
            .expect("Failed to save contact");
        services
            .health
            .create_medication_schedule(aspirin())
            .await
            .expect("Failed to create schedule");
    }

    let services = services_over(store);
    let contacts = services.communication.emergency_contacts().await.unwrap();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].name, "Alice");
    assert_eq!(services.health.medication_schedules("u1").await.unwrap().len(), 1);
    assert_eq!(
        services.pending_changes().await.unwrap(),
        vec![keys::COMMUNICATION_DATA.to_string(), keys::HEALTH_DATA.to_string()]
    );
}

#[tokio::test]
async fn test_every_repository_recovers_from_malformed_blob() {
    let store = Arc::new(MemoryStore::new());
    for key in keys::SYNCED_AGGREGATES {
        store
            .set(Namespace::Standard, key, "{\"truncated")
            .await
            .unwrap();
    }
    let services = services_over(store.clone());

    assert!(services.communication.contacts().await.unwrap().is_empty());
    assert!(services.health.load().await.unwrap().medication_schedules.is_empty());
    assert!(services.community.records().await.unwrap().is_empty());
    assert_eq!(services.privacy.settings().await.unwrap().data_retention_days, 365);
    assert!(services.privacy.audit_log().await.unwrap().is_empty());
    assert!(services.crash_reports.reports().await.unwrap().is_empty());
    assert!(services.push_tokens.tokens().await.unwrap().is_empty());

    for key in keys::SYNCED_AGGREGATES {
        let backup = store
            .get(Namespace::Standard, &keys::corrupt_backup(key))
            .await
            .unwrap();
        assert_eq!(backup.as_deref(), Some("{\"truncated"), "no backup for {key}");
    }
}

#[tokio::test]
async fn test_writes_after_corruption_replace_the_blob() {
    let store = Arc::new(MemoryStore::new());
    store
        .set(Namespace::Standard, keys::COMMUNICATION_DATA, "42")
        .await
        .unwrap();
    let services = services_over(store);

    services
        .communication
        .save_contact(Contact::new("Bob"))
        .await
        .unwrap();
    assert_eq!(services.communication.contacts().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_contact_upsert_by_id() {
    let services = services_over(Arc::new(MemoryStore::new()));
    let saved = services
        .communication
        .save_contact(Contact::new("Alice"))
        .await
        .unwrap();

    let mut edited = saved.clone();
    edited.email = Some("alice@example.com".into());
    let updated = services.communication.save_contact(edited).await.unwrap();

    let contacts = services.communication.contacts().await.unwrap();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].email.as_deref(), Some("alice@example.com"));
    assert_eq!(updated.created_at, saved.created_at);
    assert!(updated.updated_at >= saved.updated_at);
}

#[tokio::test]
async fn test_orphaned_logs_never_break_readers() {
    let services = services_over(Arc::new(MemoryStore::new()));
    let schedule = services
        .health
        .create_medication_schedule(aspirin())
        .await
        .unwrap();
    services
        .health
        .log_medication(&schedule.id, chrono::Utc::now(), MedicationStatus::Taken)
        .await
        .unwrap();
    services
        .health
        .delete_medication_schedule(&schedule.id)
        .await
        .unwrap();

    assert_eq!(services.health.medication_logs(&schedule.id).await.unwrap().len(), 1);
    let adherence = services.medication_adherence("u1").await.unwrap();
    assert_eq!(adherence.orphaned, 1);
    assert_eq!(adherence.taken, 0);
}

#[tokio::test]
async fn test_secure_items_are_not_journaled() {
    let store = Arc::new(MemoryStore::new());
    let services = services_over(store.clone());

    services.pins.set_pin("2468").await.unwrap();
    services.pins.set_auth_token("secret-token").await.unwrap();

    assert!(services.pending_changes().await.unwrap().is_empty());
    assert!(store.get(Namespace::Standard, keys::AUTH_TOKEN).await.unwrap().is_none());
    assert!(services.pins.verify_pin("2468").await.unwrap());
}
