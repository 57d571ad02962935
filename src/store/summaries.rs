//! Summary artifacts on disk.
//!
//! One JSON file per artifact id. Regenerating a period overwrites the file
//! with the new summary (upsert-by-id); the Summary value itself is never
//! mutated.

use std::path::PathBuf;

use crate::domain::{Summary, SummaryKind};

use super::StoreError;

/// Directory of summary artifacts.
pub struct SummaryStore {
    dir: PathBuf,
}

impl SummaryStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, artifact_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", artifact_id))
    }

    /// Persist a summary, superseding any prior artifact with the same id.
    pub async fn save(&self, summary: &Summary) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let json = serde_json::to_string_pretty(summary)?;
        tokio::fs::write(self.path_for(&summary.artifact_id), json).await?;

        Ok(())
    }

    pub async fn load(&self, artifact_id: &str) -> Result<Option<Summary>, StoreError> {
        let path = self.path_for(artifact_id);
        if !path.exists() {
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// All stored summaries, ordered by period start.
    pub async fn list(&self) -> Result<Vec<Summary>, StoreError> {
        let mut summaries = Vec::new();

        if !self.dir.exists() {
            return Ok(summaries);
        }

        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let content = tokio::fs::read_to_string(&path).await?;
                summaries.push(serde_json::from_str(&content)?);
            }
        }

        summaries.sort_by_key(|s: &Summary| s.period_start);
        Ok(summaries)
    }

    /// Latest successful summary of a kind, by period end.
    ///
    /// This is the scheduler's record of "last successful fire" for
    /// missed-boundary detection; no separate state file exists to drift.
    pub async fn last_of_kind(&self, kind: SummaryKind) -> Result<Option<Summary>, StoreError> {
        let summaries = self.list().await?;
        Ok(summaries
            .into_iter()
            .filter(|s| s.kind == kind)
            .max_by_key(|s| s.period_end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn daily(day: u32) -> Summary {
        let start = Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, day + 1, 0, 0, 0).unwrap();
        Summary {
            artifact_id: Summary::artifact_id_for(SummaryKind::Daily, start, end),
            period_start: start,
            period_end: end,
            kind: SummaryKind::Daily,
            body: format!("day {}", day),
            generated_at: end,
            source_entry_range: None,
        }
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let store = SummaryStore::new(temp.path().join("summaries"));

        let summary = daily(1);
        store.save(&summary).await.unwrap();

        let loaded = store.load(&summary.artifact_id).await.unwrap().unwrap();
        assert_eq!(loaded.body, "day 1");
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_supersedes_prior_artifact() {
        let temp = TempDir::new().unwrap();
        let store = SummaryStore::new(temp.path().join("summaries"));

        let mut summary = daily(1);
        store.save(&summary).await.unwrap();

        summary.body = "regenerated".to_string();
        store.save(&summary).await.unwrap();

        // Exactly one artifact for the period, holding the new body
        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].body, "regenerated");
    }

    #[tokio::test]
    async fn test_last_of_kind() {
        let temp = TempDir::new().unwrap();
        let store = SummaryStore::new(temp.path().join("summaries"));

        store.save(&daily(1)).await.unwrap();
        store.save(&daily(3)).await.unwrap();
        store.save(&daily(2)).await.unwrap();

        let last = store.last_of_kind(SummaryKind::Daily).await.unwrap().unwrap();
        assert_eq!(last.body, "day 3");

        assert!(store
            .last_of_kind(SummaryKind::Hourly)
            .await
            .unwrap()
            .is_none());
    }
}
