//! Append-only segment ledger for crash-safe processing state.
//!
//! Every finalized segment is recorded here before it is queued; state
//! changes are appended as new events and current state is derived by
//! replay. On startup, segments that were recorded but never transcribed
//! (or dead-lettered) are re-enqueued, and the next segment id continues
//! from the highest one seen.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{AudioSegment, SegmentId};

use super::StoreError;

/// An event in the segment ledger (append-only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred
    pub timestamp: DateTime<Utc>,

    /// The segment this event belongs to
    pub segment_id: SegmentId,

    /// Type of ledger event
    pub event_type: LedgerEventType,

    /// Full segment metadata (present on `Recorded` events)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment: Option<AudioSegment>,

    /// Error or reason (present on `DeadLettered`/`Dropped` events)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Types of ledger events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEventType {
    /// Segment finalized and persisted, awaiting transcription
    Recorded,

    /// Transcription completed; the audio handle has been released
    Transcribed,

    /// Retries exhausted; audio retained in the dead-letter area
    DeadLettered,

    /// Shed under backpressure before transcription
    Dropped,
}

/// Derived processing state of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// Recorded but not yet transcribed; retried on restart
    Pending,
    Transcribed,
    DeadLettered,
    Dropped,
}

/// A segment with its replay-derived state.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub segment: AudioSegment,
    pub state: SegmentState,
    pub error: Option<String>,
}

/// JSONL-backed segment ledger.
pub struct SegmentLedger {
    path: PathBuf,

    /// Serializes appends from capture and workers
    write_lock: Mutex<()>,
}

impl SegmentLedger {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    async fn append_event(&self, event: &LedgerEvent) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        let json = serde_json::to_string(event)?;
        file.write_all(format!("{}\n", json).as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    fn event(segment_id: SegmentId, event_type: LedgerEventType) -> LedgerEvent {
        LedgerEvent {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            segment_id,
            event_type,
            segment: None,
            error: None,
        }
    }

    /// Record a freshly finalized segment. Must happen before it is queued,
    /// so a crash between finalize and transcription loses nothing.
    pub async fn record(&self, segment: &AudioSegment) -> Result<(), StoreError> {
        let mut event = Self::event(segment.id, LedgerEventType::Recorded);
        event.segment = Some(segment.clone());
        self.append_event(&event).await
    }

    pub async fn mark_transcribed(&self, segment_id: SegmentId) -> Result<(), StoreError> {
        self.append_event(&Self::event(segment_id, LedgerEventType::Transcribed))
            .await
    }

    pub async fn mark_dead_lettered(
        &self,
        segment_id: SegmentId,
        error: &str,
    ) -> Result<(), StoreError> {
        let mut event = Self::event(segment_id, LedgerEventType::DeadLettered);
        event.error = Some(error.to_string());
        self.append_event(&event).await
    }

    pub async fn mark_dropped(
        &self,
        segment_id: SegmentId,
        reason: &str,
    ) -> Result<(), StoreError> {
        let mut event = Self::event(segment_id, LedgerEventType::Dropped);
        event.error = Some(reason.to_string());
        self.append_event(&event).await
    }

    /// Replay all events to build current state.
    pub async fn replay(&self) -> Result<BTreeMap<SegmentId, LedgerEntry>, StoreError> {
        let mut entries: BTreeMap<SegmentId, LedgerEntry> = BTreeMap::new();

        if !self.path.exists() {
            return Ok(entries);
        }

        let file = File::open(&self.path).await?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            let event: LedgerEvent = serde_json::from_str(&line)?;
            Self::apply_event(&mut entries, event);
        }

        Ok(entries)
    }

    fn apply_event(entries: &mut BTreeMap<SegmentId, LedgerEntry>, event: LedgerEvent) {
        match event.event_type {
            LedgerEventType::Recorded => {
                if let Some(segment) = event.segment {
                    entries.insert(
                        event.segment_id,
                        LedgerEntry {
                            segment,
                            state: SegmentState::Pending,
                            error: None,
                        },
                    );
                }
            }
            LedgerEventType::Transcribed => {
                if let Some(entry) = entries.get_mut(&event.segment_id) {
                    entry.state = SegmentState::Transcribed;
                }
            }
            LedgerEventType::DeadLettered => {
                if let Some(entry) = entries.get_mut(&event.segment_id) {
                    entry.state = SegmentState::DeadLettered;
                    entry.error = event.error;
                }
            }
            LedgerEventType::Dropped => {
                if let Some(entry) = entries.get_mut(&event.segment_id) {
                    entry.state = SegmentState::Dropped;
                    entry.error = event.error;
                }
            }
        }
    }

    /// True if the segment already completed transcription. Workers check
    /// this before calling the engine so recovered segments are never
    /// transcribed twice.
    pub async fn is_transcribed(&self, segment_id: SegmentId) -> Result<bool, StoreError> {
        let entries = self.replay().await?;
        Ok(entries
            .get(&segment_id)
            .map(|e| e.state == SegmentState::Transcribed)
            .unwrap_or(false))
    }

    /// Segments recorded but never finished, in start-time order.
    pub async fn pending(&self) -> Result<Vec<AudioSegment>, StoreError> {
        let entries = self.replay().await?;

        let mut pending: Vec<AudioSegment> = entries
            .into_values()
            .filter(|e| e.state == SegmentState::Pending)
            .map(|e| e.segment)
            .collect();

        pending.sort_by_key(|s| (s.start_time, s.id));
        Ok(pending)
    }

    /// Next segment id: one past the highest ever recorded.
    pub async fn next_segment_id(&self) -> Result<SegmentId, StoreError> {
        let entries = self.replay().await?;
        Ok(entries
            .keys()
            .next_back()
            .map(|id| id.next())
            .unwrap_or(SegmentId(0)))
    }

    /// Count of entries per state, for status reporting.
    pub async fn status(&self) -> Result<LedgerStatus, StoreError> {
        let entries = self.replay().await?;

        let mut status = LedgerStatus::default();
        for entry in entries.values() {
            match entry.state {
                SegmentState::Pending => status.pending += 1,
                SegmentState::Transcribed => status.transcribed += 1,
                SegmentState::DeadLettered => status.dead_lettered += 1,
                SegmentState::Dropped => status.dropped += 1,
            }
        }

        Ok(status)
    }
}

/// Ledger status summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct LedgerStatus {
    pub pending: usize,
    pub transcribed: usize,
    pub dead_lettered: usize,
    pub dropped: usize,
}

impl LedgerStatus {
    pub fn total(&self) -> usize {
        self.pending + self.transcribed + self.dead_lettered + self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::PathBuf as StdPathBuf;
    use tempfile::TempDir;

    fn test_segment(id: u64, minute: u32) -> AudioSegment {
        AudioSegment {
            id: SegmentId(id),
            start_time: Utc.with_ymd_and_hms(2024, 3, 1, 9, minute, 0).unwrap(),
            duration_secs: 300.0,
            audio_path: StdPathBuf::from(format!("/tmp/{}.wav", id)),
            silence_ratio: 0.1,
            sample_rate: 16000,
        }
    }

    fn test_ledger(temp: &TempDir) -> SegmentLedger {
        SegmentLedger::new(temp.path().join("segments.jsonl"))
    }

    #[tokio::test]
    async fn test_record_and_replay() {
        let temp = TempDir::new().unwrap();
        let ledger = test_ledger(&temp);

        ledger.record(&test_segment(0, 0)).await.unwrap();
        ledger.record(&test_segment(1, 5)).await.unwrap();
        ledger.mark_transcribed(SegmentId(0)).await.unwrap();

        let entries = ledger.replay().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[&SegmentId(0)].state, SegmentState::Transcribed);
        assert_eq!(entries[&SegmentId(1)].state, SegmentState::Pending);
    }

    #[tokio::test]
    async fn test_pending_ordered_by_start_time() {
        let temp = TempDir::new().unwrap();
        let ledger = test_ledger(&temp);

        // Recorded out of start-time order
        ledger.record(&test_segment(2, 10)).await.unwrap();
        ledger.record(&test_segment(1, 5)).await.unwrap();
        ledger.record(&test_segment(0, 0)).await.unwrap();
        ledger.mark_transcribed(SegmentId(1)).await.unwrap();

        let pending = ledger.pending().await.unwrap();
        let ids: Vec<SegmentId> = pending.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![SegmentId(0), SegmentId(2)]);
    }

    #[tokio::test]
    async fn test_next_segment_id_continues_after_restart() {
        let temp = TempDir::new().unwrap();

        {
            let ledger = test_ledger(&temp);
            assert_eq!(ledger.next_segment_id().await.unwrap(), SegmentId(0));
            ledger.record(&test_segment(0, 0)).await.unwrap();
            ledger.record(&test_segment(7, 5)).await.unwrap();
        }

        // A fresh handle over the same file continues the sequence
        let ledger = test_ledger(&temp);
        assert_eq!(ledger.next_segment_id().await.unwrap(), SegmentId(8));
    }

    #[tokio::test]
    async fn test_is_transcribed() {
        let temp = TempDir::new().unwrap();
        let ledger = test_ledger(&temp);

        ledger.record(&test_segment(3, 0)).await.unwrap();
        assert!(!ledger.is_transcribed(SegmentId(3)).await.unwrap());

        ledger.mark_transcribed(SegmentId(3)).await.unwrap();
        assert!(ledger.is_transcribed(SegmentId(3)).await.unwrap());

        // Unknown segments are not transcribed
        assert!(!ledger.is_transcribed(SegmentId(99)).await.unwrap());
    }

    #[tokio::test]
    async fn test_dead_letter_records_error() {
        let temp = TempDir::new().unwrap();
        let ledger = test_ledger(&temp);

        ledger.record(&test_segment(0, 0)).await.unwrap();
        ledger
            .mark_dead_lettered(SegmentId(0), "engine unavailable")
            .await
            .unwrap();

        let entries = ledger.replay().await.unwrap();
        let entry = &entries[&SegmentId(0)];
        assert_eq!(entry.state, SegmentState::DeadLettered);
        assert_eq!(entry.error.as_deref(), Some("engine unavailable"));

        let status = ledger.status().await.unwrap();
        assert_eq!(status.dead_lettered, 1);
        assert_eq!(status.pending, 0);
    }
}
