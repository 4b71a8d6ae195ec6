//! PIN and auth token storage in the secure namespace.
//!
//! Nothing here is journaled or pushed by the sync coordinator.

use std::sync::Arc;

use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::repository::keys;
use crate::storage::{KeyValueStore, Namespace};
use crate::validation::InputValidator;

fn digest(salt: &str, pin: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(pin.as_bytes());
    hex::encode(hasher.finalize())
}

/// Salted PIN hash and backend auth token
pub struct PinStore {
    store: Arc<dyn KeyValueStore>,
}

impl PinStore {
    /// Create a PIN store over `store`
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Validate and store a new PIN as `salt$sha256(salt || pin)`
    pub async fn set_pin(&self, pin: &str) -> Result<()> {
        InputValidator::validate_pin(pin)?;

        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let salt = hex::encode(salt);
        let stored = format!("{salt}${}", digest(&salt, pin));

        self.store
            .set(Namespace::Secure, keys::USER_PIN_HASH, &stored)
            .await?;
        info!("PIN updated");
        Ok(())
    }

    /// Whether `pin` matches the stored PIN. No stored PIN never matches.
    pub async fn verify_pin(&self, pin: &str) -> Result<bool> {
        let Some(stored) = self.store.get(Namespace::Secure, keys::USER_PIN_HASH).await? else {
            debug!("PIN check without a stored PIN");
            return Ok(false);
        };

        let Some((salt, expected)) = stored.split_once('$') else {
            warn!("stored PIN hash is malformed");
            return Err(StoreError::Storage("stored PIN hash is malformed".into()));
        };
        Ok(digest(salt, pin) == expected)
    }

    /// Whether a PIN has been set
    pub async fn has_pin(&self) -> Result<bool> {
        Ok(self
            .store
            .get(Namespace::Secure, keys::USER_PIN_HASH)
            .await?
            .is_some())
    }

    /// Forget the PIN
    pub async fn clear_pin(&self) -> Result<()> {
        self.store.remove(Namespace::Secure, keys::USER_PIN_HASH).await
    }

    /// Stored backend auth token
    pub async fn auth_token(&self) -> Result<Option<String>> {
        self.store.get(Namespace::Secure, keys::AUTH_TOKEN).await
    }

    /// Replace the backend auth token
    pub async fn set_auth_token(&self, token: &str) -> Result<()> {
        if token.trim().is_empty() {
            return Err(StoreError::Validation("Auth token cannot be empty".into()));
        }
        self.store.set(Namespace::Secure, keys::AUTH_TOKEN, token).await
    }

    /// Forget the backend auth token
    pub async fn clear_auth_token(&self) -> Result<()> {
        self.store.remove(Namespace::Secure, keys::AUTH_TOKEN).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn test_pin_round() {
        let store = Arc::new(MemoryStore::new());
        let pins = PinStore::new(store.clone());

        assert!(!pins.has_pin().await.unwrap());
        assert!(!pins.verify_pin("1234").await.unwrap());

        pins.set_pin("1234").await.unwrap();
        assert!(pins.verify_pin("1234").await.unwrap());
        assert!(!pins.verify_pin("4321").await.unwrap());

        let stored = store
            .get(Namespace::Secure, keys::USER_PIN_HASH)
            .await
            .unwrap()
            .unwrap();
        let (salt, hash) = stored.split_once('$').unwrap();
        assert_eq!(salt.len(), 32);
        assert_eq!(hash.len(), 64);
        assert!(store.is_empty(Namespace::Standard).await);

        pins.clear_pin().await.unwrap();
        assert!(!pins.has_pin().await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_pin_rejected() {
        let pins = PinStore::new(Arc::new(MemoryStore::new()));
        assert!(pins.set_pin("12").await.is_err());
        assert!(!pins.has_pin().await.unwrap());
    }

    #[tokio::test]
    async fn test_auth_token() {
        let pins = PinStore::new(Arc::new(MemoryStore::new()));
        pins.set_auth_token("tok").await.unwrap();
        assert_eq!(pins.auth_token().await.unwrap().as_deref(), Some("tok"));
        pins.clear_auth_token().await.unwrap();
        assert_eq!(pins.auth_token().await.unwrap(), None);
    }
}
