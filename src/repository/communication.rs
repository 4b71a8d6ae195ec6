use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::BlobRepository;
use crate::codec::now;
use crate::error::{Result, StoreError};
use crate::models::{CallStatus, CommunicationData, Contact, Message, VideoCall};
use crate::storage::KeyValueStore;
use crate::sync::ChangeJournal;
use crate::utils::new_id;
use crate::validation::InputValidator;

/// Contacts, messages and video calls
#[derive(Clone)]
pub struct CommunicationRepository {
    blobs: BlobRepository<CommunicationData>,
}

impl CommunicationRepository {
    /// Create a repository over `store`
    pub fn new(store: Arc<dyn KeyValueStore>, journal: Arc<ChangeJournal>) -> Self {
        Self {
            blobs: BlobRepository::new(store, journal),
        }
    }

    /// Whole aggregate
    pub async fn load(&self) -> Result<CommunicationData> {
        self.blobs.load().await
    }

    /// Replace the whole aggregate
    pub async fn save(&self, data: &CommunicationData) -> Result<()> {
        self.blobs.save(data).await
    }

    /// All contacts
    pub async fn contacts(&self) -> Result<Vec<Contact>> {
        Ok(self.load().await?.contacts)
    }

    /// Contacts flagged for emergencies
    pub async fn emergency_contacts(&self) -> Result<Vec<Contact>> {
        Ok(self
            .contacts()
            .await?
            .into_iter()
            .filter(|c| c.is_emergency_contact)
            .collect())
    }

    /// One contact by id
    pub async fn contact(&self, id: &str) -> Result<Option<Contact>> {
        Ok(self.contacts().await?.into_iter().find(|c| c.id == id))
    }

    /// Insert or replace a contact by id.
    ///
    /// A replaced contact keeps its original `createdAt`; `updatedAt` is stamped now.
    pub async fn save_contact(&self, mut contact: Contact) -> Result<Contact> {
        InputValidator::validate_contact(&contact)?;
        contact.updated_at = now();

        self.blobs
            .update(move |data| {
                match data.contacts.iter_mut().find(|c| c.id == contact.id) {
                    Some(existing) => {
                        contact.created_at = existing.created_at;
                        *existing = contact.clone();
                    },
                    None => data.contacts.push(contact.clone()),
                }
                Ok(contact)
            })
            .await
    }

    /// Remove a contact together with its messages and calls
    pub async fn delete_contact(&self, id: &str) -> Result<bool> {
        if !self.load().await?.contacts.iter().any(|c| c.id == id) {
            return Ok(false);
        }

        self.blobs
            .update(|data| {
                let before = data.contacts.len();
                data.contacts.retain(|c| c.id != id);
                if data.contacts.len() == before {
                    return Ok(false);
                }
                data.messages.retain(|m| m.contact_id != id);
                data.video_calls.retain(|v| v.contact_id != id);
                Ok(true)
            })
            .await
    }

    /// Messages exchanged with a contact, oldest first
    pub async fn messages_for(&self, contact_id: &str) -> Result<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .load()
            .await?
            .messages
            .into_iter()
            .filter(|m| m.contact_id == contact_id)
            .collect();
        messages.sort_by_key(|m| m.timestamp);
        Ok(messages)
    }

    /// Append a message to a known contact's history
    pub async fn send_message(&self, contact_id: &str, content: &str, is_from_user: bool) -> Result<Message> {
        let content = InputValidator::sanitize_input(content);
        if content.is_empty() {
            return Err(StoreError::Validation("Message cannot be empty".into()));
        }

        let message = Message {
            id: new_id(),
            contact_id: contact_id.to_string(),
            content,
            is_from_user,
            timestamp: now(),
            is_read: is_from_user,
        };

        self.blobs
            .update(move |data| {
                if !data.contacts.iter().any(|c| c.id == message.contact_id) {
                    return Err(StoreError::NotFound(format!("contact {}", message.contact_id)));
                }
                data.messages.push(message.clone());
                Ok(message)
            })
            .await
    }

    /// Mark every message from a contact as read, returning how many changed
    pub async fn mark_messages_read(&self, contact_id: &str) -> Result<usize> {
        let unread = self
            .messages_for(contact_id)
            .await?
            .iter()
            .filter(|m| !m.is_read)
            .count();
        if unread == 0 {
            return Ok(0);
        }

        self.blobs
            .update(|data| {
                let mut changed = 0;
                for message in data.messages.iter_mut().filter(|m| m.contact_id == contact_id && !m.is_read) {
                    message.is_read = true;
                    changed += 1;
                }
                Ok(changed)
            })
            .await
    }

    /// Unread messages across all contacts
    pub async fn unread_count(&self) -> Result<usize> {
        Ok(self.load().await?.messages.iter().filter(|m| !m.is_read).count())
    }

    /// Record a video call with a known contact
    pub async fn record_video_call(
        &self,
        contact_id: &str,
        started_at: DateTime<Utc>,
        ended_at: Option<DateTime<Utc>>,
        status: CallStatus,
    ) -> Result<VideoCall> {
        if ended_at.is_some_and(|end| end < started_at) {
            return Err(StoreError::Validation("Call cannot end before it starts".into()));
        }

        let call = VideoCall {
            id: new_id(),
            contact_id: contact_id.to_string(),
            started_at,
            ended_at,
            status,
        };

        self.blobs
            .update(move |data| {
                if !data.contacts.iter().any(|c| c.id == call.contact_id) {
                    return Err(StoreError::NotFound(format!("contact {}", call.contact_id)));
                }
                data.video_calls.push(call.clone());
                Ok(call)
            })
            .await
    }
}
