//! Sync records tracking the external representation of local artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sync state of one local artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Never successfully pushed
    Pending,

    /// Remote copy matches the recorded content hash
    Synced,

    /// Remote was modified by another writer; both versions retained
    Conflict,

    /// Push failed after retries; queued for the next sync pass
    Failed,
}

/// Tracks exactly one external representation per local artifact.
///
/// The idempotency key is `artifact_id`; content changes are detected via
/// `content_hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Local artifact id (summary or daily log)
    pub artifact_id: String,

    /// Remote document id, set on first successful upsert
    pub remote_id: Option<String>,

    /// Remote revision this process last wrote
    pub last_revision: Option<String>,

    /// Hash of the content last pushed successfully
    pub content_hash: Option<String>,

    /// When a sync was last attempted
    pub last_attempt: Option<DateTime<Utc>>,

    /// Current status
    pub status: SyncStatus,

    /// Error message for failed/conflict states
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncRecord {
    /// A fresh record for an artifact that has never been pushed.
    pub fn new(artifact_id: impl Into<String>) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            remote_id: None,
            last_revision: None,
            content_hash: None,
            last_attempt: None,
            status: SyncStatus::Pending,
            error: None,
        }
    }

    /// True if the given content hash is already synced.
    pub fn is_synced(&self, content_hash: &str) -> bool {
        self.status == SyncStatus::Synced && self.content_hash.as_deref() == Some(content_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_pending() {
        let record = SyncRecord::new("summary-daily-20240301");
        assert_eq!(record.status, SyncStatus::Pending);
        assert!(record.remote_id.is_none());
        assert!(!record.is_synced("abc"));
    }

    #[test]
    fn test_is_synced_requires_matching_hash() {
        let mut record = SyncRecord::new("a");
        record.status = SyncStatus::Synced;
        record.content_hash = Some("abc".to_string());

        assert!(record.is_synced("abc"));
        assert!(!record.is_synced("def"));
    }
}
