//! Per-date transcript logs.
//!
//! One log per calendar date, created lazily on first entry. Appends keep
//! entries ordered by segment start time even when workers finish out of
//! order. Each date persists as one append-only JSONL file, re-sorted on
//! load; snapshots are immutable copies safe to read during ongoing appends.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::TranscriptEntry;

use super::StoreError;

/// In-memory state for one date.
struct DayLog {
    entries: Vec<TranscriptEntry>,
    last_modified: Option<DateTime<Utc>>,
    loaded: bool,
}

impl DayLog {
    fn empty() -> Self {
        Self {
            entries: Vec::new(),
            last_modified: None,
            loaded: false,
        }
    }
}

/// Store of per-date transcript logs.
///
/// Appends serialize per date (one async lock per day, not a global one),
/// so concurrent workers writing to the same day are ordered while the
/// expensive engine calls stay unserialized.
pub struct DailyLogStore {
    dir: PathBuf,
    days: StdMutex<HashMap<NaiveDate, Arc<Mutex<DayLog>>>>,
}

impl DailyLogStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            days: StdMutex::new(HashMap::new()),
        }
    }

    fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.jsonl", date.format("%Y-%m-%d")))
    }

    /// Lazy rollover: a day's log springs into existence on first touch.
    fn day_handle(&self, date: NaiveDate) -> Arc<Mutex<DayLog>> {
        let mut days = self.days.lock().expect("daily log map lock poisoned");
        days.entry(date)
            .or_insert_with(|| Arc::new(Mutex::new(DayLog::empty())))
            .clone()
    }

    async fn ensure_loaded(&self, date: NaiveDate, day: &mut DayLog) -> Result<(), StoreError> {
        if day.loaded {
            return Ok(());
        }
        day.loaded = true;

        let path = self.path_for(date);
        if !path.exists() {
            return Ok(());
        }

        let content = tokio::fs::read_to_string(&path).await?;
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: TranscriptEntry = serde_json::from_str(line)?;
            day.entries.push(entry);
        }

        // File order is completion order; the log order is start-time order.
        day.entries.sort_by_key(|e| e.sort_key());

        Ok(())
    }

    /// Append an entry to the log for the date of its own start time.
    ///
    /// Idempotent per segment: a second append for an already-present
    /// segment id is a no-op, which keeps crash recovery duplicate-free.
    pub async fn append(&self, entry: TranscriptEntry) -> Result<(), StoreError> {
        let date = entry.start_time.date_naive();
        let handle = self.day_handle(date);
        let mut day = handle.lock().await;

        self.ensure_loaded(date, &mut day).await?;

        if day.entries.iter().any(|e| e.segment_id == entry.segment_id) {
            debug!(segment_id = %entry.segment_id, %date, "entry already present, skipping");
            return Ok(());
        }

        // Ordered insert keyed by start time, not completion order
        let position = day
            .entries
            .partition_point(|e| e.sort_key() <= entry.sort_key());

        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(date))
            .await?;
        let json = serde_json::to_string(&entry)?;
        file.write_all(format!("{}\n", json).as_bytes()).await?;
        file.flush().await?;

        day.entries.insert(position, entry);
        day.last_modified = Some(Utc::now());

        Ok(())
    }

    /// Immutable ordered copy of one date's entries.
    pub async fn snapshot(&self, date: NaiveDate) -> Result<Vec<TranscriptEntry>, StoreError> {
        let handle = self.day_handle(date);
        let mut day = handle.lock().await;
        self.ensure_loaded(date, &mut day).await?;
        Ok(day.entries.clone())
    }

    /// Ordered entries across all dates with `start <= start_time < end`.
    pub async fn snapshot_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TranscriptEntry>, StoreError> {
        let mut entries = Vec::new();

        let mut date = start.date_naive();
        let last = end.date_naive();

        while date <= last {
            let day_entries = self.snapshot(date).await?;
            entries.extend(
                day_entries
                    .into_iter()
                    .filter(|e| e.start_time >= start && e.start_time < end),
            );

            date = match date.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }

        Ok(entries)
    }

    /// When the date's log last changed, if it has any entries.
    pub async fn last_modified(
        &self,
        date: NaiveDate,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let handle = self.day_handle(date);
        let day = handle.lock().await;
        Ok(day.last_modified)
    }

    /// Render one date as a consolidated human-readable transcript, or None
    /// if the date has no entries.
    pub async fn render(&self, date: NaiveDate) -> Result<Option<String>, StoreError> {
        let entries = self.snapshot(date).await?;
        if entries.is_empty() {
            return Ok(None);
        }

        let mut out = format!("Daily Transcript - {}\n", date.format("%Y-%m-%d"));
        out.push_str(&"=".repeat(50));
        out.push_str("\n\n");

        for entry in &entries {
            out.push_str(&entry.render_line());
            out.push_str("\n\n");
        }

        Ok(Some(out))
    }

    /// All dates with a persisted log, ascending.
    pub async fn dates(&self) -> Result<Vec<NaiveDate>, StoreError> {
        let mut dates = Vec::new();

        if !self.dir.exists() {
            return Ok(dates);
        }

        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(stem) = name.strip_suffix(".jsonl") {
                    if let Ok(date) = NaiveDate::parse_from_str(stem, "%Y-%m-%d") {
                        dates.push(date);
                    }
                }
            }
        }

        dates.sort();
        Ok(dates)
    }

    /// Window covering one whole calendar day.
    pub fn day_window(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();
        (start, start + Duration::days(1))
    }
}
