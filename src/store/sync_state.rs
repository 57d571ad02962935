//! Sync-status table, keyed by artifact id.
//!
//! Upsert-by-append: each state change appends the full record as a JSON
//! line and replay keeps the last one per artifact.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::domain::SyncRecord;

use super::StoreError;

/// JSONL-backed table of sync records.
pub struct SyncStateTable {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SyncStateTable {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// Append the record's current state (last write wins on replay).
    pub async fn upsert(&self, record: &SyncRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let json = serde_json::to_string(record)?;
        file.write_all(format!("{}\n", json).as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    /// Replay to current state.
    pub async fn all(&self) -> Result<HashMap<String, SyncRecord>, StoreError> {
        let mut records = HashMap::new();

        if !self.path.exists() {
            return Ok(records);
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let record: SyncRecord = serde_json::from_str(line)?;
            records.insert(record.artifact_id.clone(), record);
        }

        Ok(records)
    }

    pub async fn get(&self, artifact_id: &str) -> Result<Option<SyncRecord>, StoreError> {
        Ok(self.all().await?.remove(artifact_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SyncStatus;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_last_write_wins() {
        let temp = TempDir::new().unwrap();
        let table = SyncStateTable::new(temp.path().join("sync_state.jsonl"));

        let mut record = SyncRecord::new("summary-daily-20240301");
        table.upsert(&record).await.unwrap();

        record.status = SyncStatus::Synced;
        record.remote_id = Some("doc-1".to_string());
        table.upsert(&record).await.unwrap();

        let loaded = table.get("summary-daily-20240301").await.unwrap().unwrap();
        assert_eq!(loaded.status, SyncStatus::Synced);
        assert_eq!(loaded.remote_id.as_deref(), Some("doc-1"));

        assert!(table.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_records_keyed_by_artifact() {
        let temp = TempDir::new().unwrap();
        let table = SyncStateTable::new(temp.path().join("sync_state.jsonl"));

        table.upsert(&SyncRecord::new("a")).await.unwrap();
        table.upsert(&SyncRecord::new("b")).await.unwrap();

        let all = table.all().await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
