use std::sync::Arc;

use tracing::debug;

use super::BlobRepository;
use crate::codec::now;
use crate::error::Result;
use crate::models::PushToken;
use crate::storage::KeyValueStore;
use crate::sync::ChangeJournal;
use crate::validation::InputValidator;

/// Device registrations for reminders, unique by token
#[derive(Clone)]
pub struct PushTokenRepository {
    blobs: BlobRepository<Vec<PushToken>>,
}

impl PushTokenRepository {
    /// Create a repository over `store`
    pub fn new(store: Arc<dyn KeyValueStore>, journal: Arc<ChangeJournal>) -> Self {
        Self {
            blobs: BlobRepository::new(store, journal),
        }
    }

    /// Register `token`; registering it again refreshes platform and time
    pub async fn register(&self, token: &str, platform: &str) -> Result<PushToken> {
        InputValidator::validate_push_token(token)?;
        let entry = PushToken {
            token: token.trim().to_string(),
            platform: platform.trim().to_lowercase(),
            registered_at: now(),
        };

        self.blobs
            .update(move |tokens| {
                match tokens.iter_mut().find(|t| t.token == entry.token) {
                    Some(existing) => *existing = entry.clone(),
                    None => tokens.push(entry.clone()),
                }
                Ok(entry)
            })
            .await
    }

    /// Registered tokens
    pub async fn tokens(&self) -> Result<Vec<PushToken>> {
        self.blobs.load().await
    }

    /// Forget `token`. Unknown tokens write nothing.
    pub async fn unregister(&self, token: &str) -> Result<bool> {
        if !self.tokens().await?.iter().any(|t| t.token == token) {
            debug!("unregister of unknown push token ignored");
            return Ok(false);
        }
        self.blobs
            .update(|tokens| {
                tokens.retain(|t| t.token != token);
                Ok(true)
            })
            .await
    }
}
