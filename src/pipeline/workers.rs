//! Transcription worker pool.
//!
//! N workers pull segments in order, call the engine (with the shared retry
//! policy), and append ordered entries to the daily log. Failures never
//! vanish: exhausted retries dead-letter the segment with its audio intact.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{EngineError, TranscriptionEngine};
use crate::control::{ControlPlane, RunState};
use crate::core::retry::RetryPolicy;
use crate::domain::{AudioSegment, TranscriptEntry};
use crate::store::{DailyLogStore, DeadLetter, SegmentLedger};

use super::queue::SegmentConsumer;

/// Everything a worker needs, cloned per task.
#[derive(Clone)]
pub struct WorkerContext {
    pub consumer: SegmentConsumer,
    pub engine: Arc<dyn TranscriptionEngine>,
    pub daily_log: Arc<DailyLogStore>,
    pub ledger: Arc<SegmentLedger>,
    pub dead_letter: Arc<DeadLetter>,
    pub retry: RetryPolicy,
    pub language: String,
    pub control: ControlPlane,
}

/// Spawn the worker pool.
pub fn spawn_workers(count: usize, ctx: WorkerContext) -> Vec<JoinHandle<()>> {
    (0..count.max(1))
        .map(|index| {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                run_worker(index, ctx).await;
            })
        })
        .collect()
}

#[instrument(skip(ctx), fields(worker = index))]
async fn run_worker(index: usize, ctx: WorkerContext) {
    debug!("worker started");

    loop {
        // Pause gates the dequeue, never in-flight work: a paused pipeline
        // finishes what it started and stops pulling new segments.
        let segment = match ctx.control.wait_until_running().await {
            RunState::ShuttingDown => {
                // Shutdown drain: keep pulling whatever is already queued,
                // without waiting for more.
                match ctx.consumer.try_dequeue().await {
                    Some(segment) => segment,
                    None => break,
                }
            }
            _ => match ctx.consumer.dequeue().await {
                Some(segment) => segment,
                None => break,
            },
        };

        process_segment(&ctx, segment).await;
    }

    debug!("worker stopped");
}

async fn process_segment(ctx: &WorkerContext, segment: AudioSegment) {
    // Idempotency check: a segment recovered after a crash may already have
    // been transcribed. Never produce a duplicate entry.
    match ctx.ledger.is_transcribed(segment.id).await {
        Ok(true) => {
            debug!(segment_id = %segment.id, "segment already transcribed, skipping");
            release_audio(&segment).await;
            ctx.consumer.mark_done(&segment);
            return;
        }
        Ok(false) => {}
        Err(e) => {
            warn!(segment_id = %segment.id, error = %e, "ledger check failed, transcribing anyway");
        }
    }

    let result = ctx
        .retry
        .run(
            |attempt| {
                if attempt > 1 {
                    debug!(segment_id = %segment.id, attempt, "retrying transcription");
                }
                ctx.engine.transcribe(&segment.audio_path, &ctx.language)
            },
            EngineError::is_transient,
        )
        .await;

    match result {
        Ok(transcription) => {
            let text = transcription.text.trim().to_string();

            if text.is_empty() {
                // Nothing worth logging; the ledger still explains the gap
                debug!(segment_id = %segment.id, "empty transcription");
            } else {
                let entry = TranscriptEntry {
                    segment_id: segment.id,
                    start_time: segment.start_time,
                    text,
                    confidence: transcription.confidence,
                };

                if let Err(e) = ctx.daily_log.append(entry).await {
                    error!(segment_id = %segment.id, error = %e, "failed to append transcript entry");
                    dead_letter(ctx, &segment, &format!("transcript append failed: {}", e)).await;
                    ctx.consumer.mark_done(&segment);
                    return;
                }
            }

            if let Err(e) = ctx.ledger.mark_transcribed(segment.id).await {
                error!(segment_id = %segment.id, error = %e, "failed to update ledger");
            }

            info!(
                segment_id = %segment.id,
                duration_secs = segment.duration_secs,
                "segment transcribed"
            );
            release_audio(&segment).await;
        }
        Err(e) => {
            warn!(
                segment_id = %segment.id,
                error = %e,
                "transcription failed after retries, dead-lettering segment"
            );
            dead_letter(ctx, &segment, &e.to_string()).await;
        }
    }

    ctx.consumer.mark_done(&segment);
}

async fn dead_letter(ctx: &WorkerContext, segment: &AudioSegment, reason: &str) {
    if let Err(e) = ctx.dead_letter.record(segment, reason).await {
        error!(segment_id = %segment.id, error = %e, "failed to record dead-letter entry");
    }
    if let Err(e) = ctx.ledger.mark_dead_lettered(segment.id, reason).await {
        error!(segment_id = %segment.id, error = %e, "failed to update ledger");
    }
}

/// Successful transcription releases the raw audio.
async fn release_audio(segment: &AudioSegment) {
    if segment.audio_path.exists() {
        if let Err(e) = tokio::fs::remove_file(&segment.audio_path).await {
            warn!(segment_id = %segment.id, error = %e, "failed to remove segment audio");
        }
    }
}
