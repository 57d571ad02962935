//! Pipeline Scenario Tests
//!
//! End-to-end scenarios: a morning of segments flowing through workers into
//! one daily log, a manual summary covering exactly that window, a
//! summarizer that recovers within its retry budget, and the settling
//! barrier holding a summary until in-flight work clears its window.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use daybook::adapters::{
    EngineError, SummarizeError, Summarizer, SummaryStyle, Transcription, TranscriptionEngine,
};
use daybook::config::OverflowPolicy;
use daybook::control::ControlPlane;
use daybook::domain::{AudioSegment, SegmentId, SummaryKind};
use daybook::pipeline::{segment_queue, spawn_workers, WorkerContext};
use daybook::store::{DailyLogStore, DeadLetter, SegmentLedger, SummaryStore};
use daybook::{ManualClock, RetryPolicy, SummaryBuilder};

struct EchoEngine;

#[async_trait]
impl TranscriptionEngine for EchoEngine {
    fn name(&self) -> &str {
        "echo"
    }

    async fn transcribe(
        &self,
        audio_path: &Path,
        _language_hint: &str,
    ) -> Result<Transcription, EngineError> {
        let stem = audio_path
            .file_stem()
            .unwrap()
            .to_string_lossy()
            .to_string();
        Ok(Transcription {
            text: format!("spoken words from {}", stem),
            confidence: 0.85,
        })
    }
}

struct FlakySummarizer {
    failures_before_success: u32,
    calls: AtomicU32,
}

#[async_trait]
impl Summarizer for FlakySummarizer {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn summarize(&self, text: &str, _style: &SummaryStyle) -> Result<String, SummarizeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures_before_success {
            return Err(SummarizeError::RateLimited);
        }
        Ok(format!("digest of {} lines", text.lines().count()))
    }
}

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
}

async fn make_segment(dir: &TempDir, id: u64, start: DateTime<Utc>) -> AudioSegment {
    let audio_path: PathBuf = dir.path().join(format!("seg{}.wav", id));
    tokio::fs::write(&audio_path, b"wav").await.unwrap();

    AudioSegment {
        id: SegmentId(id),
        start_time: start,
        duration_secs: 300.0,
        audio_path,
        silence_ratio: 0.2,
        sample_rate: 16000,
    }
}

struct Pipeline {
    queue: daybook::SegmentQueue,
    ctx: WorkerContext,
    daily_log: Arc<DailyLogStore>,
    summaries: Arc<SummaryStore>,
    ledger: Arc<SegmentLedger>,
    builder: SummaryBuilder,
    summarizer: Arc<FlakySummarizer>,
}

fn assemble(temp: &TempDir, summarizer_failures: u32, settle_timeout: Duration) -> Pipeline {
    let daily_log = Arc::new(DailyLogStore::new(temp.path().join("transcripts")));
    let summaries = Arc::new(SummaryStore::new(temp.path().join("summaries")));
    let ledger = Arc::new(SegmentLedger::new(temp.path().join("segments.jsonl")));
    let dead_letter = Arc::new(DeadLetter::new(temp.path().join("deadletter")));
    let summarizer = Arc::new(FlakySummarizer {
        failures_before_success: summarizer_failures,
        calls: AtomicU32::new(0),
    });

    let (queue, consumer) = segment_queue(8, OverflowPolicy::Block);
    let pending = queue.pending();

    let ctx = WorkerContext {
        consumer,
        engine: Arc::new(EchoEngine),
        daily_log: daily_log.clone(),
        ledger: ledger.clone(),
        dead_letter,
        retry: RetryPolicy::immediate(3),
        language: "en".to_string(),
        control: ControlPlane::new(),
    };

    let builder = SummaryBuilder::new(
        daily_log.clone(),
        summaries.clone(),
        summarizer.clone(),
        pending,
        RetryPolicy::immediate(3),
        SummaryStyle {
            model: "test".to_string(),
            max_tokens: 100,
            temperature: 0.0,
        },
        8000,
        settle_timeout,
        Arc::new(ManualClock::at(at(9, 30))),
    );

    Pipeline {
        queue,
        ctx,
        daily_log,
        summaries,
        ledger,
        builder,
        summarizer,
    }
}

#[tokio::test]
async fn test_three_segment_morning_with_manual_summary() {
    let temp = TempDir::new().unwrap();
    let p = assemble(&temp, 0, Duration::from_millis(100));

    // Three 5-minute segments spanning 09:00-09:15, no silence gaps
    for (id, minute) in [(0u64, 0u32), (1, 5), (2, 10)] {
        let segment = make_segment(&temp, id, at(9, minute)).await;
        p.ledger.record(&segment).await.unwrap();
        p.queue.enqueue(segment).await.unwrap();
    }
    drop(p.queue);

    for handle in spawn_workers(2, p.ctx) {
        handle.await.unwrap();
    }

    // One daily log for the date with three ordered entries
    let date = at(9, 0).date_naive();
    let entries = p.daily_log.snapshot(date).await.unwrap();
    assert_eq!(entries.len(), 3);
    let ids: Vec<SegmentId> = entries.iter().map(|e| e.segment_id).collect();
    assert_eq!(ids, vec![SegmentId(0), SegmentId(1), SegmentId(2)]);

    // Manual summary for 09:00-09:15 covers exactly those three entries
    let summary = p
        .builder
        .build(at(9, 0), at(9, 15), SummaryKind::Manual)
        .await
        .unwrap();

    let range = summary.source_entry_range.expect("source range");
    assert_eq!(range.first_segment, SegmentId(0));
    assert_eq!(range.last_segment, SegmentId(2));
    assert_eq!(range.entry_count, 3);
    assert_eq!(summary.body, "digest of 3 lines");
}

#[tokio::test]
async fn test_summarizer_recovers_within_retry_budget() {
    let temp = TempDir::new().unwrap();
    let p = assemble(&temp, 2, Duration::from_millis(100));

    let segment = make_segment(&temp, 0, at(9, 0)).await;
    p.ledger.record(&segment).await.unwrap();
    p.queue.enqueue(segment).await.unwrap();
    drop(p.queue);

    for handle in spawn_workers(1, p.ctx) {
        handle.await.unwrap();
    }

    // Fails twice, succeeds on the third call within the 3-attempt budget
    let summary = p
        .builder
        .build(at(9, 0), at(9, 15), SummaryKind::Manual)
        .await
        .unwrap();

    assert_eq!(p.summarizer.calls.load(Ordering::SeqCst), 3);
    assert!(summary.body.starts_with("digest"));

    // Generated exactly once: a single artifact exists
    assert_eq!(p.summaries.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_summary_waits_for_inflight_segment_in_window() {
    struct SlowEngine;

    #[async_trait]
    impl TranscriptionEngine for SlowEngine {
        fn name(&self) -> &str {
            "slow"
        }

        async fn transcribe(
            &self,
            _audio_path: &Path,
            _language_hint: &str,
        ) -> Result<Transcription, EngineError> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(Transcription {
                text: "late arrival".to_string(),
                confidence: 0.9,
            })
        }
    }

    let temp = TempDir::new().unwrap();
    let mut p = assemble(&temp, 0, Duration::from_secs(5));
    p.ctx.engine = Arc::new(SlowEngine);

    let segment = make_segment(&temp, 0, at(9, 5)).await;
    p.ledger.record(&segment).await.unwrap();
    p.queue.enqueue(segment).await.unwrap();
    drop(p.queue);

    let workers = spawn_workers(1, p.ctx);

    // The summary window contains the in-flight segment; the settling
    // barrier must hold the build until the worker finishes.
    let summary = p
        .builder
        .build(at(9, 0), at(9, 15), SummaryKind::Manual)
        .await
        .unwrap();

    let range = summary.source_entry_range.expect("entry included after settling");
    assert_eq!(range.entry_count, 1);

    for handle in workers {
        handle.await.unwrap();
    }
}
