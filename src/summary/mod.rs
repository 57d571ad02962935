//! Summary generation over a daily-log window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::adapters::{SummarizeError, Summarizer, SummaryStyle};
use crate::core::clock::SharedClock;
use crate::core::retry::RetryPolicy;
use crate::domain::{EntryRange, Summary, SummaryKind};
use crate::pipeline::queue::PendingSegments;
use crate::store::{DailyLogStore, StoreError, SummaryStore};

/// Errors from summary generation.
#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("summarization failed: {0}")]
    Summarize(#[from] SummarizeError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Builds and persists summaries for transcript windows.
pub struct SummaryBuilder {
    daily_log: Arc<DailyLogStore>,
    summaries: Arc<SummaryStore>,
    summarizer: Arc<dyn Summarizer>,

    /// Settling barrier shared with the segment queue
    pending: Arc<PendingSegments>,

    retry: RetryPolicy,
    style: SummaryStyle,
    max_input_chars: usize,
    settle_timeout: Duration,
    clock: SharedClock,
}

impl SummaryBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        daily_log: Arc<DailyLogStore>,
        summaries: Arc<SummaryStore>,
        summarizer: Arc<dyn Summarizer>,
        pending: Arc<PendingSegments>,
        retry: RetryPolicy,
        style: SummaryStyle,
        max_input_chars: usize,
        settle_timeout: Duration,
        clock: SharedClock,
    ) -> Self {
        Self {
            daily_log,
            summaries,
            summarizer,
            pending,
            retry,
            style,
            max_input_chars,
            settle_timeout,
            clock,
        }
    }

    /// Build a summary for the window, persist it, and return it.
    ///
    /// Waits for the settling barrier so no in-flight segment overlaps the
    /// window. An empty window produces the sentinel summary rather than
    /// skipping silently. Transient engine failures retry under the shared
    /// policy; permanent failure leaves no artifact for the period.
    #[instrument(skip(self), fields(kind = %kind))]
    pub async fn build(
        &self,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        kind: SummaryKind,
    ) -> Result<Summary, SummaryError> {
        if !self.pending.settled(period_end, self.settle_timeout).await {
            warn!(
                settle_timeout_secs = self.settle_timeout.as_secs(),
                "window not settled in time, summarizing available entries"
            );
        }

        let entries = self.daily_log.snapshot_range(period_start, period_end).await?;

        let summary = if entries.is_empty() {
            Summary {
                artifact_id: Summary::artifact_id_for(kind, period_start, period_end),
                period_start,
                period_end,
                kind,
                body: Summary::NO_ACTIVITY.to_string(),
                generated_at: self.clock.now(),
                source_entry_range: None,
            }
        } else {
            let mut text = entries
                .iter()
                .map(|e| e.render_line())
                .collect::<Vec<_>>()
                .join("\n");

            if text.chars().count() > self.max_input_chars {
                text = text.chars().take(self.max_input_chars).collect();
                text.push_str("... [truncated]");
            }

            let body = self
                .retry
                .run(
                    |_| self.summarizer.summarize(&text, &self.style),
                    SummarizeError::is_transient,
                )
                .await?;

            // Entries are ordered; first/last bound the source range
            let range = EntryRange {
                first_segment: entries[0].segment_id,
                last_segment: entries[entries.len() - 1].segment_id,
                entry_count: entries.len(),
            };

            Summary {
                artifact_id: Summary::artifact_id_for(kind, period_start, period_end),
                period_start,
                period_end,
                kind,
                body,
                generated_at: self.clock.now(),
                source_entry_range: Some(range),
            }
        };

        self.summaries.save(&summary).await?;

        info!(
            artifact_id = %summary.artifact_id,
            entries = summary.source_entry_range.map(|r| r.entry_count).unwrap_or(0),
            "summary generated"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SummarizeError;
    use crate::core::clock::ManualClock;
    use crate::domain::{SegmentId, TranscriptEntry};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    struct ScriptedSummarizer {
        failures_before_success: u32,
        permanent: bool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Summarizer for ScriptedSummarizer {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn summarize(
            &self,
            text: &str,
            _style: &SummaryStyle,
        ) -> Result<String, SummarizeError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.permanent {
                return Err(SummarizeError::Auth("bad key".to_string()));
            }
            if call < self.failures_before_success {
                return Err(SummarizeError::RateLimited);
            }
            Ok(format!("summary of {} chars", text.chars().count()))
        }
    }

    fn style() -> SummaryStyle {
        SummaryStyle {
            model: "test".to_string(),
            max_tokens: 100,
            temperature: 0.0,
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    struct Harness {
        builder: SummaryBuilder,
        daily_log: Arc<DailyLogStore>,
        summaries: Arc<SummaryStore>,
        calls: Arc<ScriptedSummarizer>,
        _temp: TempDir,
    }

    fn harness(failures_before_success: u32, permanent: bool) -> Harness {
        let temp = TempDir::new().unwrap();
        let daily_log = Arc::new(DailyLogStore::new(temp.path().join("transcripts")));
        let summaries = Arc::new(SummaryStore::new(temp.path().join("summaries")));
        let summarizer = Arc::new(ScriptedSummarizer {
            failures_before_success,
            permanent,
            calls: AtomicU32::new(0),
        });
        let clock = ManualClock::at(at(10, 0));

        let builder = SummaryBuilder::new(
            daily_log.clone(),
            summaries.clone(),
            summarizer.clone(),
            Arc::new(PendingSegments::default()),
            RetryPolicy::immediate(3),
            style(),
            8000,
            Duration::from_millis(50),
            Arc::new(clock),
        );

        Harness {
            builder,
            daily_log,
            summaries,
            calls: summarizer,
            _temp: temp,
        }
    }

    async fn seed_entries(h: &Harness) {
        for (id, minute) in [(0u64, 0u32), (1, 5), (2, 10)] {
            h.daily_log
                .append(TranscriptEntry {
                    segment_id: SegmentId(id),
                    start_time: at(9, minute),
                    text: format!("entry {}", id),
                    confidence: 0.9,
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_manual_window_covers_exact_entries() {
        let h = harness(0, false);
        seed_entries(&h).await;

        let summary = h
            .builder
            .build(at(9, 0), at(9, 15), SummaryKind::Manual)
            .await
            .unwrap();

        let range = summary.source_entry_range.expect("range");
        assert_eq!(range.first_segment, SegmentId(0));
        assert_eq!(range.last_segment, SegmentId(2));
        assert_eq!(range.entry_count, 3);
    }

    #[tokio::test]
    async fn test_empty_period_produces_sentinel() {
        let h = harness(0, false);

        let summary = h
            .builder
            .build(at(9, 0), at(10, 0), SummaryKind::Hourly)
            .await
            .unwrap();

        assert_eq!(summary.body, Summary::NO_ACTIVITY);
        assert!(summary.is_empty_period());
        // The engine was never consulted for an empty window
        assert_eq!(h.calls.calls.load(Ordering::SeqCst), 0);

        // The sentinel is a real persisted artifact
        let stored = h.summaries.load(&summary.artifact_id).await.unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn test_transient_failures_retry_then_single_artifact() {
        let h = harness(2, false);
        seed_entries(&h).await;

        let summary = h
            .builder
            .build(at(9, 0), at(9, 15), SummaryKind::Manual)
            .await
            .unwrap();

        assert_eq!(h.calls.calls.load(Ordering::SeqCst), 3);
        assert!(summary.body.starts_with("summary of"));

        // Exactly one artifact for the period
        assert_eq!(h.summaries.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_leaves_no_artifact() {
        let h = harness(0, true);
        seed_entries(&h).await;

        let err = h
            .builder
            .build(at(9, 0), at(9, 15), SummaryKind::Manual)
            .await
            .unwrap_err();

        assert!(matches!(err, SummaryError::Summarize(SummarizeError::Auth(_))));
        // Auth errors are not retried
        assert_eq!(h.calls.calls.load(Ordering::SeqCst), 1);
        assert!(h.summaries.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_input_truncated_to_cap() {
        let h = harness(0, false);

        h.daily_log
            .append(TranscriptEntry {
                segment_id: SegmentId(0),
                start_time: at(9, 0),
                text: "x".repeat(20_000),
                confidence: 0.9,
            })
            .await
            .unwrap();

        let summary = h
            .builder
            .build(at(9, 0), at(9, 15), SummaryKind::Manual)
            .await
            .unwrap();

        // 8000 chars + the 15-char truncation marker
        assert_eq!(summary.body, "summary of 8015 chars");
    }
}
