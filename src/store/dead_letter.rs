//! Dead-letter area for segments that never made it to a transcript.
//!
//! Audio is moved here (not deleted) so a gap in a daily log can always be
//! explained by inspection. The retention policy ages out the raw audio;
//! the JSONL index is never rewritten.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::AudioSegment;

use super::StoreError;

/// One dead-lettered segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub segment: AudioSegment,

    /// Why the segment ended up here
    pub reason: String,

    pub recorded_at: DateTime<Utc>,

    /// Where the audio was moved to (may no longer exist after retention)
    pub retained_audio: PathBuf,
}

/// Filesystem dead-letter area: an index file plus retained WAVs.
pub struct DeadLetter {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl DeadLetter {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            write_lock: Mutex::new(()),
        }
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join("deadletter.jsonl")
    }

    /// Record a failed segment, moving its audio into the dead-letter area.
    pub async fn record(
        &self,
        segment: &AudioSegment,
        reason: &str,
    ) -> Result<DeadLetterRecord, StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let file_name = segment
            .audio_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("segment_{}.wav", segment.id));
        let retained_audio = self.dir.join(file_name);

        if segment.audio_path.exists() {
            tokio::fs::rename(&segment.audio_path, &retained_audio).await?;
        } else {
            warn!(segment_id = %segment.id, "dead-lettered segment has no audio file");
        }

        let record = DeadLetterRecord {
            segment: segment.clone(),
            reason: reason.to_string(),
            recorded_at: Utc::now(),
            retained_audio,
        };

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.index_path())
            .await?;
        let json = serde_json::to_string(&record)?;
        file.write_all(format!("{}\n", json).as_bytes()).await?;
        file.flush().await?;

        Ok(record)
    }

    /// All dead-letter records, oldest first.
    pub async fn list(&self) -> Result<Vec<DeadLetterRecord>, StoreError> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let mut records = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str(line)?);
        }

        Ok(records)
    }

    /// Delete retained audio recorded before the cutoff. Text (the index)
    /// is never touched. Returns the number of files removed.
    pub async fn purge_audio_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut removed = 0;

        for record in self.list().await? {
            if record.recorded_at < cutoff && record.retained_audio.exists() {
                tokio::fs::remove_file(&record.retained_audio).await?;
                debug!(path = %record.retained_audio.display(), "purged aged dead-letter audio");
                removed += 1;
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SegmentId;
    use chrono::TimeZone;
    use tempfile::TempDir;

    async fn segment_with_audio(temp: &TempDir, id: u64) -> AudioSegment {
        let audio_path = temp.path().join(format!("audio_{}.wav", id));
        tokio::fs::write(&audio_path, b"fake wav content").await.unwrap();

        AudioSegment {
            id: SegmentId(id),
            start_time: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
            duration_secs: 300.0,
            audio_path,
            silence_ratio: 0.1,
            sample_rate: 16000,
        }
    }

    #[tokio::test]
    async fn test_record_moves_audio() {
        let temp = TempDir::new().unwrap();
        let dead_letter = DeadLetter::new(temp.path().join("deadletter"));

        let segment = segment_with_audio(&temp, 0).await;
        let original = segment.audio_path.clone();

        let record = dead_letter.record(&segment, "engine timeout").await.unwrap();

        assert!(!original.exists());
        assert!(record.retained_audio.exists());
        assert_eq!(record.reason, "engine timeout");
    }

    #[tokio::test]
    async fn test_list_explains_gaps() {
        let temp = TempDir::new().unwrap();
        let dead_letter = DeadLetter::new(temp.path().join("deadletter"));

        let a = segment_with_audio(&temp, 0).await;
        let b = segment_with_audio(&temp, 1).await;
        dead_letter.record(&a, "queue full").await.unwrap();
        dead_letter.record(&b, "engine unavailable").await.unwrap();

        let records = dead_letter.list().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].segment.id, SegmentId(0));
        assert_eq!(records[1].reason, "engine unavailable");
    }

    #[tokio::test]
    async fn test_purge_removes_audio_keeps_index() {
        let temp = TempDir::new().unwrap();
        let dead_letter = DeadLetter::new(temp.path().join("deadletter"));

        let segment = segment_with_audio(&temp, 0).await;
        dead_letter.record(&segment, "failed").await.unwrap();

        // Cutoff in the future: everything ages out
        let removed = dead_letter
            .purge_audio_older_than(Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let records = dead_letter.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].retained_audio.exists());

        // Purge is idempotent once audio is gone
        let removed = dead_letter
            .purge_audio_older_than(Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(removed, 0);
    }
}
