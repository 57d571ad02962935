//! Transcript entries, the unit of the daily log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::segment::SegmentId;

/// One transcribed segment, as it appears in a daily log.
///
/// Immutable once written. Entries are keyed into a log by the calendar
/// date of their own `start_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// The segment this text came from
    pub segment_id: SegmentId,

    /// When the originating segment started
    pub start_time: DateTime<Utc>,

    /// Transcribed text
    pub text: String,

    /// Engine-reported confidence (0.0 - 1.0)
    pub confidence: f32,
}

impl TranscriptEntry {
    /// Sort key: entries are ordered by start time, with the segment id as
    /// a tiebreaker.
    pub fn sort_key(&self) -> (DateTime<Utc>, SegmentId) {
        (self.start_time, self.segment_id)
    }

    /// Render this entry as a transcript line: `[HH:MM:SS] text`
    pub fn render_line(&self) -> String {
        format!("[{}] {}", self.start_time.format("%H:%M:%S"), self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_render_line_format() {
        let entry = TranscriptEntry {
            segment_id: SegmentId(7),
            start_time: Utc.with_ymd_and_hms(2024, 3, 1, 9, 5, 30).unwrap(),
            text: "standup notes".to_string(),
            confidence: 0.9,
        };

        assert_eq!(entry.render_line(), "[09:05:30] standup notes");
    }

    #[test]
    fn test_serialization_round_trip() {
        let entry = TranscriptEntry {
            segment_id: SegmentId(1),
            start_time: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
            text: "hello".to_string(),
            confidence: 0.5,
        };

        let json = serde_json::to_string(&entry).unwrap();
        let parsed: TranscriptEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entry);
    }
}
