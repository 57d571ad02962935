//! Audio capture: source → segment writer → segment queue.
//!
//! The capture task is the single producer of the segment queue. It never
//! blocks on engine calls; the only thing that can slow it down is queue
//! backpressure, which is bounded by design.

pub mod device;
pub mod silence;
pub mod writer;

use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::control::ControlPlane;
use crate::domain::AudioSegment;
use crate::pipeline::queue::{QueueError, SegmentQueue};
use crate::store::{DeadLetter, SegmentLedger};

pub use device::{AudioSource, ChannelSource};
pub use silence::{SilenceConfig, SilenceDetector};
pub use writer::SegmentWriter;

/// Errors from the capture side.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Device or stream failure; the pipeline pauses rather than exits
    #[error("audio capture lost: {0}")]
    CaptureLost(String),

    #[error("failed to persist segment audio: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV encoding failed: {0}")]
    Wav(#[from] hound::Error),
}

/// Run the capture loop until the source ends or shutdown is requested.
///
/// Finalized segments are recorded in the ledger before they are queued, so
/// a crash at any point between finalize and transcription loses nothing.
/// On shutdown the remaining buffer is flushed; if the queue has no room
/// left the segment stays recorded and is recovered on the next startup.
pub async fn run_capture<S: AudioSource>(
    mut source: S,
    mut writer: SegmentWriter,
    queue: SegmentQueue,
    ledger: Arc<SegmentLedger>,
    dead_letter: Arc<DeadLetter>,
    control: ControlPlane,
) -> Result<()> {
    info!("capture started");

    loop {
        if control.is_shutting_down() {
            break;
        }

        let chunk = match source.next_chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                info!("audio source ended");
                break;
            }
            Err(e) => {
                // Device gone: pause the pipeline instead of tearing it down,
                // so queued work still drains and the operator can recover.
                error!(error = %e, "capture lost, pausing pipeline");
                control.pause();
                break;
            }
        };

        if control.is_paused() {
            continue;
        }

        if let Some(segment) = writer.feed(&chunk)? {
            deliver(segment, &queue, &ledger, &dead_letter).await?;
        }
    }

    // Shutdown flush: whatever is buffered becomes a final segment.
    if let Some(segment) = writer.force_finalize()? {
        ledger.record(&segment).await?;
        match queue.try_enqueue(segment) {
            Ok(()) => {}
            Err(QueueError::Full(segment)) | Err(QueueError::Closed(segment)) => {
                info!(
                    segment_id = %segment.id,
                    "final segment persisted for recovery on next startup"
                );
            }
        }
    }

    info!("capture stopped");
    Ok(())
}

async fn deliver(
    segment: AudioSegment,
    queue: &SegmentQueue,
    ledger: &SegmentLedger,
    dead_letter: &DeadLetter,
) -> Result<()> {
    ledger.record(&segment).await?;
    debug!(segment_id = %segment.id, start_time = %segment.start_time, "segment queued");

    match queue.enqueue(segment).await {
        Ok(()) => {}
        Err(QueueError::Full(segment)) => {
            // Drop overflow policy: shed the segment, but keep it explainable
            warn!(
                segment_id = %segment.id,
                "segment queue full, shedding segment to dead-letter"
            );
            dead_letter.record(&segment, "queue full").await?;
            ledger.mark_dropped(segment.id, "queue full").await?;
        }
        Err(QueueError::Closed(segment)) => {
            info!(
                segment_id = %segment.id,
                "queue closed, segment persisted for recovery"
            );
        }
    }

    Ok(())
}
