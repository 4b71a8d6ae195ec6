use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use super::BlobRepository;
use crate::codec::now;
use crate::error::{Result, StoreError};
use crate::models::{DataSharingPermissions, FamilyAccessPermission, PrivacyAuditEntry, PrivacySettings, SharingFlag};
use crate::sanitizer::{prune_older_than, Sanitizer};
use crate::storage::KeyValueStore;
use crate::sync::ChangeJournal;
use crate::utils::new_id;
use crate::validation::InputValidator;

/// Privacy preferences, family grants and the audit trail
#[derive(Clone)]
pub struct PrivacyRepository {
    settings: BlobRepository<PrivacySettings>,
    audit: BlobRepository<Vec<PrivacyAuditEntry>>,
    sanitizer: Arc<Sanitizer>,
}

impl PrivacyRepository {
    /// Create a repository over `store`; audit details are scrubbed with `sanitizer`
    pub fn new(store: Arc<dyn KeyValueStore>, journal: Arc<ChangeJournal>, sanitizer: Arc<Sanitizer>) -> Self {
        Self {
            settings: BlobRepository::new(Arc::clone(&store), Arc::clone(&journal)),
            audit: BlobRepository::new(store, journal),
            sanitizer,
        }
    }

    /// Current settings, defaults when nothing is stored
    pub async fn settings(&self) -> Result<PrivacySettings> {
        self.settings.load().await
    }

    /// Replace the settings and stamp `updatedAt`
    pub async fn save_settings(&self, mut settings: PrivacySettings) -> Result<PrivacySettings> {
        InputValidator::validate_retention_days(settings.data_retention_days)?;
        settings.updated_at = Some(now());
        self.settings.save(&settings).await?;
        self.record_audit("settings_updated", "privacy settings replaced").await?;
        Ok(settings)
    }

    /// Change how long logs and reports are kept
    pub async fn set_retention_days(&self, days: u32) -> Result<PrivacySettings> {
        InputValidator::validate_retention_days(days)?;
        let settings = self
            .settings
            .update(|settings| {
                settings.data_retention_days = days;
                settings.updated_at = Some(now());
                Ok(settings.clone())
            })
            .await?;
        self.record_audit("retention_changed", &format!("data retention set to {days} days"))
            .await?;
        Ok(settings)
    }

    /// Grant a family member access, replacing an earlier grant for the same member
    pub async fn grant_family_access(
        &self,
        family_member_id: &str,
        family_member_name: &str,
        relationship: &str,
        permissions: DataSharingPermissions,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<FamilyAccessPermission> {
        if family_member_id.trim().is_empty() {
            return Err(StoreError::Validation("Family member id cannot be empty".into()));
        }
        InputValidator::validate_contact_name(family_member_name)?;

        let at = now();
        let grant = self
            .settings
            .update(|settings| {
                let grant = match settings
                    .family_access
                    .iter_mut()
                    .find(|g| g.family_member_id == family_member_id)
                {
                    Some(existing) => {
                        existing.family_member_name = family_member_name.to_string();
                        existing.relationship = relationship.to_string();
                        existing.permissions = permissions;
                        existing.expires_at = expires_at;
                        existing.updated_at = at;
                        existing.clone()
                    },
                    None => {
                        let grant = FamilyAccessPermission {
                            id: new_id(),
                            family_member_id: family_member_id.to_string(),
                            family_member_name: family_member_name.to_string(),
                            relationship: relationship.to_string(),
                            permissions,
                            granted_at: at,
                            updated_at: at,
                            expires_at,
                        };
                        settings.family_access.push(grant.clone());
                        grant
                    },
                };
                settings.updated_at = Some(at);
                Ok(grant)
            })
            .await?;

        info!(family_member_id, "family access granted");
        self.record_audit(
            "family_access_granted",
            &format!("access granted to {family_member_name}"),
        )
        .await?;
        Ok(grant)
    }

    /// Change what an existing grant shares
    pub async fn update_family_permissions(
        &self,
        family_member_id: &str,
        permissions: DataSharingPermissions,
    ) -> Result<FamilyAccessPermission> {
        let grant = self
            .settings
            .update(|settings| {
                let at = now();
                let grant = settings
                    .family_access
                    .iter_mut()
                    .find(|g| g.family_member_id == family_member_id)
                    .ok_or_else(|| StoreError::NotFound(format!("family access for {family_member_id}")))?;
                grant.permissions = permissions;
                grant.updated_at = at;
                let grant = grant.clone();
                settings.updated_at = Some(at);
                Ok(grant)
            })
            .await?;

        self.record_audit(
            "family_permissions_updated",
            &format!("permissions changed for {}", grant.family_member_name),
        )
        .await?;
        Ok(grant)
    }

    /// Remove a family member's grant
    pub async fn revoke_family_access(&self, family_member_id: &str) -> Result<bool> {
        let settings = self.settings().await?;
        let Some(grant) = settings
            .family_access
            .iter()
            .find(|g| g.family_member_id == family_member_id)
        else {
            return Ok(false);
        };
        let name = grant.family_member_name.clone();

        self.settings
            .update(|settings| {
                settings
                    .family_access
                    .retain(|g| g.family_member_id != family_member_id);
                settings.updated_at = Some(now());
                Ok(())
            })
            .await?;

        info!(family_member_id, "family access revoked");
        self.record_audit("family_access_revoked", &format!("access revoked for {name}"))
            .await?;
        Ok(true)
    }

    /// Whether `family_member_id` may see `flag` now. Missing or expired grants deny.
    pub async fn family_member_can(&self, family_member_id: &str, flag: SharingFlag) -> Result<bool> {
        self.family_member_can_at(family_member_id, flag, Utc::now()).await
    }

    /// [`Self::family_member_can`] evaluated at `at`
    pub async fn family_member_can_at(
        &self,
        family_member_id: &str,
        flag: SharingFlag,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self
            .settings()
            .await?
            .family_access
            .iter()
            .find(|g| g.family_member_id == family_member_id)
            .is_some_and(|g| !g.is_expired(at) && g.permissions.allows(flag)))
    }

    /// Audit trail, oldest first
    pub async fn audit_log(&self) -> Result<Vec<PrivacyAuditEntry>> {
        self.audit.load().await
    }

    /// Append an audit entry; `details` are sanitized first
    pub async fn record_audit(&self, action: &str, details: &str) -> Result<PrivacyAuditEntry> {
        let entry = PrivacyAuditEntry {
            id: new_id(),
            timestamp: now(),
            action: action.to_string(),
            details: self.sanitizer.sanitize_text(details),
        };

        self.audit
            .update(move |log| {
                log.push(entry.clone());
                Ok(entry)
            })
            .await
    }

    /// Drop audit entries older than `cutoff`. Writes only when something went.
    pub async fn prune_audit_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut log = self.audit.load().await?;
        let removed = prune_older_than(&mut log, cutoff);
        if removed > 0 {
            self.audit.save(&log).await?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::storage::MemoryStore;

    fn repo() -> PrivacyRepository {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let journal = Arc::new(ChangeJournal::new(Arc::clone(&store)));
        PrivacyRepository::new(store, journal, Arc::new(Sanitizer::new("test-salt")))
    }

    #[tokio::test]
    async fn test_defaults_when_empty() {
        let settings = repo().settings().await.unwrap();
        assert_eq!(settings.data_retention_days, 365);
        assert!(settings.crash_reporting_enabled);
        assert!(settings.family_access.is_empty());
    }

    #[tokio::test]
    async fn test_retention_bounds() {
        let repo = repo();
        assert!(repo.set_retention_days(0).await.is_err());
        assert_eq!(repo.set_retention_days(30).await.unwrap().data_retention_days, 30);
        assert_eq!(repo.settings().await.unwrap().data_retention_days, 30);
    }

    #[tokio::test]
    async fn test_family_permissions() {
        let repo = repo();
        let perms = DataSharingPermissions {
            medications: true,
            ..DataSharingPermissions::default()
        };
        repo.grant_family_access("fm-1", "Jane", "Daughter", perms, None)
            .await
            .unwrap();

        assert!(repo.family_member_can("fm-1", SharingFlag::Medications).await.unwrap());
        assert!(!repo.family_member_can("fm-1", SharingFlag::Location).await.unwrap());
        assert!(!repo.family_member_can("fm-2", SharingFlag::Medications).await.unwrap());

        repo.update_family_permissions("fm-1", DataSharingPermissions::all())
            .await
            .unwrap();
        assert!(repo.family_member_can("fm-1", SharingFlag::Location).await.unwrap());

        assert!(repo.revoke_family_access("fm-1").await.unwrap());
        assert!(!repo.revoke_family_access("fm-1").await.unwrap());
        assert!(!repo.family_member_can("fm-1", SharingFlag::Medications).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_grant_denies() {
        let repo = repo();
        let expires = Utc::now() + Duration::days(1);
        repo.grant_family_access("fm-1", "Jane", "Daughter", DataSharingPermissions::all(), Some(expires))
            .await
            .unwrap();

        let before = expires - Duration::hours(1);
        let after = expires + Duration::hours(1);
        assert!(repo.family_member_can_at("fm-1", SharingFlag::HealthStatus, before).await.unwrap());
        assert!(!repo.family_member_can_at("fm-1", SharingFlag::HealthStatus, after).await.unwrap());
    }

    #[tokio::test]
    async fn test_audit_details_sanitized() {
        let repo = repo();
        repo.record_audit("export", "sent to jane@example.com").await.unwrap();
        let log = repo.audit_log().await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].details, "sent to [email]");
    }

    #[tokio::test]
    async fn test_privacy_actions_are_audited() {
        let repo = repo();
        repo.set_retention_days(90).await.unwrap();
        repo.grant_family_access("fm-1", "Jane", "Daughter", DataSharingPermissions::all(), None)
            .await
            .unwrap();
        let actions: Vec<String> = repo.audit_log().await.unwrap().into_iter().map(|e| e.action).collect();
        assert_eq!(actions, vec!["retention_changed", "family_access_granted"]);
    }
}
