//! Generated summaries over a daily-log window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::segment::SegmentId;

/// What triggered a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryKind {
    /// Top-of-hour scheduled summary
    Hourly,

    /// Daily scheduled summary
    Daily,

    /// Operator-requested, arbitrary window
    Manual,
}

impl std::fmt::Display for SummaryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SummaryKind::Hourly => "hourly",
            SummaryKind::Daily => "daily",
            SummaryKind::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// The range of transcript entries a summary was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRange {
    /// First segment id in the window
    pub first_segment: SegmentId,

    /// Last segment id in the window
    pub last_segment: SegmentId,

    /// Number of entries covered
    pub entry_count: usize,
}

/// A generated digest over a transcript window.
///
/// Immutable once generated. A retried generation for the same period
/// produces a new Summary that supersedes the prior artifact (upsert by
/// `artifact_id`, never mutated in place). Periods with no entries still
/// produce a sentinel summary with `source_entry_range: None`, so every
/// period has a deterministic artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    /// Stable artifact id, derived from kind and period
    pub artifact_id: String,

    /// Start of the summarized window (inclusive)
    pub period_start: DateTime<Utc>,

    /// End of the summarized window (exclusive)
    pub period_end: DateTime<Utc>,

    /// What triggered this summary
    pub kind: SummaryKind,

    /// Summary text returned by the engine, or the no-activity sentinel
    pub body: String,

    /// When this summary was generated
    pub generated_at: DateTime<Utc>,

    /// Entries the summary was built from (None for an empty period)
    pub source_entry_range: Option<EntryRange>,
}

impl Summary {
    /// Body used for periods with no transcript entries.
    pub const NO_ACTIVITY: &'static str = "No activity recorded for this period.";

    /// Deterministic artifact id for a period.
    ///
    /// The id doubles as the sync idempotency key, so regenerating a period
    /// supersedes rather than duplicates.
    pub fn artifact_id_for(
        kind: SummaryKind,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> String {
        match kind {
            SummaryKind::Daily => {
                format!("summary-daily-{}", period_start.format("%Y%m%d"))
            }
            SummaryKind::Hourly => {
                format!("summary-hourly-{}", period_start.format("%Y%m%dT%H%M"))
            }
            SummaryKind::Manual => format!(
                "summary-manual-{}-{}",
                period_start.format("%Y%m%dT%H%M"),
                period_end.format("%Y%m%dT%H%M"),
            ),
        }
    }

    /// True if this is the sentinel produced for an empty period.
    pub fn is_empty_period(&self) -> bool {
        self.source_entry_range.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_artifact_id_is_deterministic() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();

        let a = Summary::artifact_id_for(SummaryKind::Daily, start, end);
        let b = Summary::artifact_id_for(SummaryKind::Daily, start, end);
        assert_eq!(a, b);
        assert_eq!(a, "summary-daily-20240301");
    }

    #[test]
    fn test_artifact_id_distinguishes_kinds() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();

        let hourly = Summary::artifact_id_for(SummaryKind::Hourly, start, end);
        let manual = Summary::artifact_id_for(SummaryKind::Manual, start, end);
        assert_ne!(hourly, manual);
    }
}
