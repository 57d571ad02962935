//! Audio segments, the unit of transcription.

use std::path::PathBuf;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Monotonic segment sequence number.
///
/// Ids stay monotonic across process restarts: the segment ledger supplies
/// the next id on startup.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SegmentId(pub u64);

impl SegmentId {
    /// The id following this one
    pub fn next(self) -> SegmentId {
        SegmentId(self.0 + 1)
    }
}

impl std::fmt::Display for SegmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A finalized, bounded slice of captured audio awaiting transcription.
///
/// Owned exclusively by the segment queue until a worker consumes it. The
/// underlying WAV file is released after successful transcription, or moved
/// to the dead-letter area after exhausting retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSegment {
    /// Monotonic sequence number
    pub id: SegmentId,

    /// When capture of this segment began
    pub start_time: DateTime<Utc>,

    /// Length of the captured audio in seconds
    pub duration_secs: f64,

    /// WAV file holding the samples
    pub audio_path: PathBuf,

    /// Fraction of 100ms windows below the noise gate (1.0 = all silence)
    pub silence_ratio: f32,

    /// Sample rate of the stored audio
    pub sample_rate: u32,
}

impl AudioSegment {
    /// Calendar date this segment belongs to (by its own start time, never
    /// by wall clock at processing time)
    pub fn date(&self) -> NaiveDate {
        self.start_time.date_naive()
    }

    /// When capture of this segment ended
    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + Duration::milliseconds((self.duration_secs * 1000.0) as i64)
    }
}
