//! Daemon wiring: startup recovery, task spawning, bounded shutdown drain.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::adapters::{
    ChatSummarizer, DocumentStore, RestDocumentStore, Summarizer, SummaryStyle,
    TranscriptionEngine, WhisperCliEngine,
};
use crate::capture::{run_capture, AudioSource, SegmentWriter};
use crate::config::AppConfig;
use crate::control::ControlPlane;
use crate::pipeline::{segment_queue, spawn_workers, WorkerContext};
use crate::scheduler::{ManualRequest, SummaryScheduler};
use crate::store::{DailyLogStore, DeadLetter, SegmentLedger, SummaryStore, SyncStateTable};
use crate::summary::SummaryBuilder;
use crate::sync::{run_sync_task, SyncDispatcher};

use super::clock::SharedClock;

/// The assembled pipeline process.
pub struct Daemon {
    config: AppConfig,
    engine: Arc<dyn TranscriptionEngine>,
    summarizer: Arc<dyn Summarizer>,
    doc_store: Option<Arc<dyn DocumentStore>>,
    clock: SharedClock,
}

impl Daemon {
    pub fn new(
        config: AppConfig,
        engine: Arc<dyn TranscriptionEngine>,
        summarizer: Arc<dyn Summarizer>,
        doc_store: Option<Arc<dyn DocumentStore>>,
        clock: SharedClock,
    ) -> Self {
        Self {
            config,
            engine,
            summarizer,
            doc_store,
            clock,
        }
    }

    /// Wire the default external engines from configuration.
    pub fn from_config(config: AppConfig) -> Self {
        let engine = Arc::new(WhisperCliEngine::new(
            config.transcription.model.clone(),
            Duration::from_secs(config.transcription.timeout_secs),
        ));
        let summarizer = Arc::new(ChatSummarizer::new(config.summary.api_base.clone()));

        let doc_store: Option<Arc<dyn DocumentStore>> =
            match (config.sync.enabled, config.sync.endpoint.clone()) {
                (true, Some(endpoint)) => Some(Arc::new(RestDocumentStore::new(endpoint))),
                (true, None) => {
                    warn!("sync.enabled is set but sync.endpoint is missing, sync disabled");
                    None
                }
                _ => None,
            };

        Self::new(
            config,
            engine,
            summarizer,
            doc_store,
            Arc::new(super::clock::SystemClock),
        )
    }

    /// Run the pipeline until the control plane shuts it down.
    pub async fn run<S>(self, source: S, control: ControlPlane) -> Result<()>
    where
        S: AudioSource + 'static,
    {
        let paths = self.config.storage_paths()?;
        paths.ensure_directories()?;
        let _lock = acquire_instance_lock(&paths.lock_file())?;

        let ledger = Arc::new(SegmentLedger::new(paths.ledger()));
        let daily_log = Arc::new(DailyLogStore::new(paths.transcripts.clone()));
        let dead_letter = Arc::new(DeadLetter::new(paths.dead_letter.clone()));
        let summaries = Arc::new(SummaryStore::new(paths.summaries.clone()));

        // Crash recovery: anything recorded but never finished is re-queued
        let recovered = ledger.pending().await?;
        let next_id = ledger.next_segment_id().await?;
        if !recovered.is_empty() {
            info!(count = recovered.len(), "recovered unprocessed segments");
        }

        let (queue, consumer) = segment_queue(
            self.config.transcription.queue_capacity,
            self.config.transcription.overflow,
        );
        let pending = queue.pending();

        let worker_handles = spawn_workers(
            self.config.transcription.workers,
            WorkerContext {
                consumer,
                engine: self.engine.clone(),
                daily_log: daily_log.clone(),
                ledger: ledger.clone(),
                dead_letter: dead_letter.clone(),
                retry: self.config.retry.clone(),
                language: self.config.transcription.language.clone(),
                control: control.clone(),
            },
        );

        // Feed recovered segments from a side task so startup never blocks
        // on queue capacity
        let recovery_handle = {
            let queue = queue.clone();
            tokio::spawn(async move {
                for segment in recovered {
                    let id = segment.id;
                    if let Err(e) = queue.enqueue(segment).await {
                        warn!(segment_id = %id, error = %e, "failed to re-queue recovered segment");
                    }
                }
            })
        };

        let writer = SegmentWriter::new(
            self.config.audio.clone(),
            paths.audio.clone(),
            self.clock.clone(),
            next_id,
        );
        let capture_handle = tokio::spawn(run_capture(
            source,
            writer,
            queue,
            ledger.clone(),
            dead_letter.clone(),
            control.clone(),
        ));

        let builder = Arc::new(SummaryBuilder::new(
            daily_log.clone(),
            summaries.clone(),
            self.summarizer.clone(),
            pending,
            self.config.retry.clone(),
            SummaryStyle {
                model: self.config.summary.model.clone(),
                max_tokens: self.config.summary.max_tokens,
                temperature: self.config.summary.temperature,
            },
            self.config.summary.max_input_chars,
            Duration::from_secs(self.config.summary.settle_timeout_secs),
            self.clock.clone(),
        ));

        let scheduler = SummaryScheduler::new(
            &self.config.summary,
            builder,
            summaries.clone(),
            self.clock.clone(),
            control.clone(),
        )?;
        let (manual_tx, manual_rx) = mpsc::channel::<ManualRequest>(8);
        let scheduler_handle = tokio::spawn(scheduler.run(manual_rx));

        let sync_handle = self.doc_store.as_ref().map(|doc_store| {
            let dispatcher = Arc::new(SyncDispatcher::new(
                doc_store.clone(),
                SyncStateTable::new(paths.sync_state()),
                paths.conflicts.clone(),
                self.config.retry.clone(),
                self.clock.clone(),
            ));
            tokio::spawn(run_sync_task(
                dispatcher,
                daily_log.clone(),
                summaries.clone(),
                Duration::from_secs(self.config.sync.interval_secs),
                self.clock.clone(),
                control.clone(),
            ))
        });

        let retention_handle = tokio::spawn(run_retention(
            dead_letter.clone(),
            self.config.storage.max_audio_age_days,
            self.clock.clone(),
            control.clone(),
        ));

        info!("daybook pipeline running");

        // Park until shutdown
        let mut control_rx = control.watch();
        while !control.is_shutting_down() {
            if control_rx.changed().await.is_err() {
                break;
            }
        }

        // Drain: capture flushes and drops its queue handle, the recovery
        // feeder finishes, then workers run the queue dry. Anything still
        // queued past the timeout stays in the ledger for the next startup.
        let drain_timeout = Duration::from_secs(self.config.shutdown_timeout_secs);

        if tokio::time::timeout(drain_timeout, capture_handle)
            .await
            .is_err()
        {
            warn!("capture did not stop within the shutdown timeout");
        }
        if tokio::time::timeout(drain_timeout, recovery_handle)
            .await
            .is_err()
        {
            warn!("recovery feeder did not finish within the shutdown timeout");
        }

        let workers_done = async {
            for handle in worker_handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(drain_timeout, workers_done).await.is_err() {
            let left = ledger.status().await.map(|s| s.pending).unwrap_or(0);
            warn!(
                pending = left,
                "shutdown timeout reached, unprocessed segments remain persisted for recovery"
            );
        }

        drop(manual_tx);
        let _ = scheduler_handle.await;
        let _ = retention_handle.await;
        if let Some(handle) = sync_handle {
            let _ = handle.await;
        }

        info!("daybook pipeline stopped");
        Ok(())
    }
}

/// One daybook instance per state directory.
fn acquire_instance_lock(path: &Path) -> Result<std::fs::File> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .with_context(|| format!("Failed to open lock file: {}", path.display()))?;

    file.try_lock_exclusive().with_context(|| {
        format!(
            "another daybook instance is already using {}",
            path.display()
        )
    })?;

    Ok(file)
}

/// Next 02:00 retention boundary after `now`.
fn next_retention_time(now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now
        .date_naive()
        .and_hms_opt(2, 0, 0)
        .unwrap_or_default()
        .and_utc();

    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

/// Daily retention tick: age out dead-letter audio. Raw audio only; text is
/// never deleted.
async fn run_retention(
    dead_letter: Arc<DeadLetter>,
    max_audio_age_days: u32,
    clock: SharedClock,
    control: ControlPlane,
) {
    let mut control_rx = control.watch();

    loop {
        let now = clock.now();
        let sleep_for = (next_retention_time(now) - now)
            .to_std()
            .unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = tokio::time::sleep(sleep_for) => {
                let cutoff = clock.now() - chrono::Duration::days(max_audio_age_days as i64);
                match dead_letter.purge_audio_older_than(cutoff).await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "retention pass removed aged audio"),
                    Err(e) => warn!(error = %e, "retention pass failed"),
                }
            }
            changed = control_rx.changed() => {
                if changed.is_err() || control.is_shutting_down() {
                    break;
                }
            }
        }
    }
}
