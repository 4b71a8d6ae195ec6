//! PII scrubbing and retention pruning for logs and reports.
//!
//! Nothing reaches the crash-report or audit blobs without passing through
//! [`sanitize_text`] first, and user identifiers are replaced by a salted digest.

use chrono::{DateTime, Duration, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::models::Timestamped;
use crate::repository::{keys, CrashReportRepository, HealthRepository, PrivacyRepository};

lazy_static! {
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap();
    static ref CREDIT_CARD_REGEX: Regex =
        Regex::new(r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b").unwrap();
    static ref SSN_REGEX: Regex = Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap();
    static ref PHONE_REGEX: Regex =
        Regex::new(r"(?:\+?\d{1,2}[-.\s]?)?(?:\(\d{3}\)|\b\d{3})[-.\s]?\d{3}[-.\s]?\d{4}\b").unwrap();
}

/// Longest stored message or stack, in characters
pub const MAX_SANITIZED_LEN: usize = 4_000;

/// Replace emails, card numbers, SSNs and phone numbers with placeholders.
///
/// Emails go first so their digits are not mistaken for phone numbers.
#[must_use]
pub fn sanitize_text(text: &str) -> String {
    let text = EMAIL_REGEX.replace_all(text, "[email]");
    let text = CREDIT_CARD_REGEX.replace_all(&text, "[card]");
    let text = SSN_REGEX.replace_all(&text, "[ssn]");
    let text = PHONE_REGEX.replace_all(&text, "[phone]");
    truncate_chars(&text, MAX_SANITIZED_LEN)
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

/// Salted, non-reversible identifiers for correlating reports
#[derive(Debug, Clone)]
pub struct Sanitizer {
    salt: String,
}

impl Sanitizer {
    /// Create a sanitizer hashing with `salt`
    #[must_use]
    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }

    /// First 16 hex digits of SHA-256 over salt and value
    #[must_use]
    pub fn hash_value(&self, value: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(value.as_bytes());
        hex::encode(&hasher.finalize()[..8])
    }

    /// Scrub free text; see [`sanitize_text`]
    #[must_use]
    pub fn sanitize_text(&self, text: &str) -> String {
        sanitize_text(text)
    }
}

/// Drop entries stamped before `cutoff`, returning how many went
pub fn prune_older_than<T: Timestamped>(entries: &mut Vec<T>, cutoff: DateTime<Utc>) -> usize {
    let before = entries.len();
    entries.retain(|entry| entry.timestamp() >= cutoff);
    before - entries.len()
}

/// Counts removed by one retention pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// Privacy audit entries removed
    pub audit_entries_removed: usize,
    /// Crash reports removed
    pub crash_reports_removed: usize,
    /// Medication logs removed
    pub medication_logs_removed: usize,
}

impl RetentionReport {
    /// Entries removed in total
    #[must_use]
    pub const fn total(&self) -> usize {
        self.audit_entries_removed + self.crash_reports_removed + self.medication_logs_removed
    }
}

/// Applies the privacy retention window to every log-like collection
pub struct RetentionCleaner {
    privacy: PrivacyRepository,
    crash_reports: CrashReportRepository,
    health: HealthRepository,
}

impl RetentionCleaner {
    /// Create a cleaner over the given repositories
    #[must_use]
    pub const fn new(
        privacy: PrivacyRepository,
        crash_reports: CrashReportRepository,
        health: HealthRepository,
    ) -> Self {
        Self {
            privacy,
            crash_reports,
            health,
        }
    }

    /// Prune everything older than `dataRetentionDays`
    pub async fn cleanup_old_data(&self) -> Result<RetentionReport> {
        self.cleanup_old_data_at(Utc::now()).await
    }

    /// Prune relative to `now`. Collections with nothing to prune are not rewritten,
    /// so a second call is a no-op.
    pub async fn cleanup_old_data_at(&self, now: DateTime<Utc>) -> Result<RetentionReport> {
        let settings = self.privacy.settings().await?;
        let cutoff = now - Duration::days(i64::from(settings.data_retention_days));

        let report = RetentionReport {
            audit_entries_removed: self.privacy.prune_audit_before(cutoff).await?,
            crash_reports_removed: self.crash_reports.prune_before(cutoff).await?,
            medication_logs_removed: self.health.prune_logs_before(cutoff).await?,
        };

        MetricsCollector::record_retention_pruned(keys::PRIVACY_AUDIT_LOG, report.audit_entries_removed);
        MetricsCollector::record_retention_pruned(keys::CRASH_REPORTS, report.crash_reports_removed);
        MetricsCollector::record_retention_pruned(keys::HEALTH_DATA, report.medication_logs_removed);
        info!(
            retention_days = settings.data_retention_days,
            removed = report.total(),
            "retention cleanup finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_and_phone_are_replaced() {
        let out = sanitize_text("Contact me at a@b.com or 555-123-4567");
        assert!(!out.contains("a@b.com"));
        assert!(!out.contains("555-123-4567"));
        assert_eq!(out, "Contact me at [email] or [phone]");
    }

    #[test]
    fn test_card_and_ssn_are_replaced() {
        let out = sanitize_text("card 4111 1111 1111 1111, ssn 123-45-6789");
        assert_eq!(out, "card [card], ssn [ssn]");
    }

    #[test]
    fn test_phone_variants() {
        assert_eq!(sanitize_text("(555) 123-4567"), "[phone]");
        assert_eq!(sanitize_text("+1 555 123 4567"), "[phone]");
        assert_eq!(sanitize_text("call 5551234567 now"), "call [phone] now");
    }

    #[test]
    fn test_plain_text_untouched() {
        let text = "Took 2 pills at 08:30, feeling fine";
        assert_eq!(sanitize_text(text), text);
    }

    #[test]
    fn test_long_text_is_truncated() {
        let out = sanitize_text(&"x".repeat(MAX_SANITIZED_LEN + 10));
        assert_eq!(out.chars().count(), MAX_SANITIZED_LEN + 1);
    }

    #[test]
    fn test_hash_is_stable_and_salted() {
        let a = Sanitizer::new("salt-a");
        let b = Sanitizer::new("salt-b");
        assert_eq!(a.hash_value("user-1"), a.hash_value("user-1"));
        assert_ne!(a.hash_value("user-1"), b.hash_value("user-1"));
        assert_eq!(a.hash_value("user-1").len(), 16);
        assert!(!a.hash_value("user-1").contains("user"));
    }
}
