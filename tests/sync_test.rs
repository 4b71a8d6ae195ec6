//! Offline durability and reconnect behavior

use std::sync::Arc;

use companion_store::models::Contact;
use companion_store::repository::keys;
use companion_store::sync::{ConnectivityState, SimulatedBackend};
use companion_store::{AppConfig, CompanionServices, MemoryStore, StoreError, SyncError};

fn fast_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.sync.base_delay_ms = 1;
    config.sync.max_delay_ms = 2;
    config
}

fn services_with(backend: Arc<SimulatedBackend>) -> CompanionServices {
    CompanionServices::with_store(Arc::new(MemoryStore::new()), backend, fast_config())
}

#[tokio::test]
async fn test_offline_writes_are_kept_and_replayed() {
    let backend = Arc::new(SimulatedBackend::default());
    let services = services_with(Arc::clone(&backend));

    services.sync.set_online(false).await.unwrap();
    assert_eq!(services.sync.state(), ConnectivityState::Offline);

    let saved = services
        .communication
        .save_contact(Contact::new("Alice"))
        .await
        .expect("Offline write must succeed locally");

    assert_eq!(services.communication.contacts().await.unwrap(), vec![saved]);
    assert_eq!(
        services.pending_changes().await.unwrap(),
        vec![keys::COMMUNICATION_DATA.to_string()]
    );
    assert!(matches!(
        services.sync.sync_all().await,
        Err(StoreError::Sync(SyncError::Offline))
    ));
    assert_eq!(backend.received_count().await, 0);

    let report = services
        .sync
        .set_online(true)
        .await
        .expect("Reconnect sync failed")
        .expect("Pending changes should be pushed on reconnect");

    assert_eq!(report.pushed, vec![keys::COMMUNICATION_DATA.to_string()]);
    assert!(backend.received(keys::COMMUNICATION_DATA).await.unwrap().contains("Alice"));
    assert!(services.pending_changes().await.unwrap().is_empty());
    assert_eq!(services.sync.last_sync_time().await.unwrap(), Some(report.completed_at));
}

#[tokio::test]
async fn test_failed_sync_keeps_local_state() {
    let backend = Arc::new(SimulatedBackend::default());
    let services = services_with(Arc::clone(&backend));
    services.push_tokens.register("device-1", "ios").await.unwrap();

    backend.fail_next(10);
    let err = services.sync.sync_all().await.unwrap_err();
    assert!(matches!(err, StoreError::Sync(SyncError::Push { failed: 1, .. })));

    let status = services.sync.status().await.unwrap();
    assert_eq!(status.state, ConnectivityState::Online);
    assert_eq!(status.consecutive_failures, 1);
    assert_eq!(status.last_sync_time, None);
    assert_eq!(status.pending, vec![keys::PUSH_TOKENS.to_string()]);
    assert_eq!(services.push_tokens.tokens().await.unwrap().len(), 1);

    backend.fail_next(0);
    services.sync.sync_all().await.expect("Retry after failure should succeed");
    let status = services.sync.status().await.unwrap();
    assert_eq!(status.consecutive_failures, 0);
    assert!(status.last_sync_time.is_some());
}

#[tokio::test]
async fn test_state_changes_are_observable() {
    let services = services_with(Arc::new(SimulatedBackend::default()));
    let mut states = services.sync.subscribe();

    services.sync.set_online(false).await.unwrap();
    states.changed().await.unwrap();
    assert_eq!(*states.borrow_and_update(), ConnectivityState::Offline);

    // nothing pending, so reconnecting goes straight back to online
    assert!(services.sync.set_online(true).await.unwrap().is_none());
    states.changed().await.unwrap();
    assert_eq!(*states.borrow_and_update(), ConnectivityState::Online);
}
