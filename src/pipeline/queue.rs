//! Bounded, ordered hand-off between capture and transcription.
//!
//! The queue is the backpressure point protecting memory: capture either
//! blocks on a full queue or sheds the segment, per the configured overflow
//! policy. A single producer enqueues in start-time order and consumers pull
//! through a shared receiver, so delivery order matches enqueue order without
//! re-sorting.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tracing::warn;

use crate::config::OverflowPolicy;
use crate::domain::{AudioSegment, SegmentId};

/// Errors from queue hand-off. The segment is handed back so the caller can
/// dead-letter or persist it.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("segment queue is full")]
    Full(AudioSegment),

    #[error("segment queue is closed")]
    Closed(AudioSegment),
}

/// Segments that are queued or being transcribed, keyed by start time.
///
/// The summary builder waits on this set to ensure no in-flight segment
/// overlaps a summarization window (settling).
#[derive(Debug, Default)]
pub struct PendingSegments {
    inner: Mutex<BTreeSet<(DateTime<Utc>, SegmentId)>>,
    changed: Notify,
}

impl PendingSegments {
    fn insert(&self, segment: &AudioSegment) {
        self.inner
            .lock()
            .expect("pending set lock poisoned")
            .insert((segment.start_time, segment.id));
    }

    fn remove(&self, segment: &AudioSegment) {
        self.inner
            .lock()
            .expect("pending set lock poisoned")
            .remove(&(segment.start_time, segment.id));
        self.changed.notify_waiters();
    }

    /// Earliest pending start time, if any.
    pub fn earliest(&self) -> Option<DateTime<Utc>> {
        self.inner
            .lock()
            .expect("pending set lock poisoned")
            .iter()
            .next()
            .map(|(t, _)| *t)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("pending set lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_settled(&self, before: DateTime<Utc>) -> bool {
        self.earliest().map_or(true, |t| t >= before)
    }

    /// Wait until no pending segment starts before `before`.
    ///
    /// Returns false if the window is still unsettled when the timeout
    /// elapses.
    pub async fn settled(&self, before: DateTime<Utc>, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register interest before checking, so a removal between the
            // check and the wait is not missed.
            let mut notified = std::pin::pin!(self.changed.notified());
            notified.as_mut().enable();

            if self.is_settled(before) {
                return true;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.is_settled(before);
            }
        }
    }
}

/// Producer half of the segment queue.
#[derive(Clone)]
pub struct SegmentQueue {
    tx: mpsc::Sender<AudioSegment>,
    pending: Arc<PendingSegments>,
    policy: OverflowPolicy,
    capacity: usize,
}

/// Consumer half, shared by the transcription workers.
#[derive(Clone)]
pub struct SegmentConsumer {
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<AudioSegment>>>,
    pending: Arc<PendingSegments>,
}

/// Create a bounded segment queue.
pub fn segment_queue(capacity: usize, policy: OverflowPolicy) -> (SegmentQueue, SegmentConsumer) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let pending = Arc::new(PendingSegments::default());

    (
        SegmentQueue {
            tx,
            pending: pending.clone(),
            policy,
            capacity: capacity.max(1),
        },
        SegmentConsumer {
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            pending,
        },
    )
}

impl SegmentQueue {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pending-segment tracker shared with the summary builder.
    pub fn pending(&self) -> Arc<PendingSegments> {
        self.pending.clone()
    }

    /// Enqueue under the configured overflow policy.
    ///
    /// Under `Block` this waits for a free slot (logging the backpressure
    /// event); under `Drop` a full queue returns `QueueError::Full` with the
    /// segment handed back.
    pub async fn enqueue(&self, segment: AudioSegment) -> Result<(), QueueError> {
        self.pending.insert(&segment);

        match self.tx.try_send(segment) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(segment)) => {
                self.pending.remove(&segment);
                Err(QueueError::Closed(segment))
            }
            Err(mpsc::error::TrySendError::Full(segment)) => match self.policy {
                OverflowPolicy::Drop => {
                    self.pending.remove(&segment);
                    Err(QueueError::Full(segment))
                }
                OverflowPolicy::Block => {
                    warn!(
                        segment_id = %segment.id,
                        capacity = self.capacity,
                        "segment queue full, capture backpressure engaged"
                    );
                    match self.tx.send(segment).await {
                        Ok(()) => Ok(()),
                        Err(mpsc::error::SendError(segment)) => {
                            self.pending.remove(&segment);
                            Err(QueueError::Closed(segment))
                        }
                    }
                }
            },
        }
    }

    /// Enqueue without ever blocking, regardless of policy. Used for the
    /// shutdown flush where a full queue means "leave it persisted".
    pub fn try_enqueue(&self, segment: AudioSegment) -> Result<(), QueueError> {
        self.pending.insert(&segment);

        match self.tx.try_send(segment) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(segment)) => {
                self.pending.remove(&segment);
                Err(QueueError::Full(segment))
            }
            Err(mpsc::error::TrySendError::Closed(segment)) => {
                self.pending.remove(&segment);
                Err(QueueError::Closed(segment))
            }
        }
    }
}

impl SegmentConsumer {
    /// Pull the next segment in enqueue order. Returns None once the queue
    /// is closed and drained.
    pub async fn dequeue(&self) -> Option<AudioSegment> {
        self.rx.lock().await.recv().await
    }

    /// Non-blocking dequeue for the shutdown drain.
    pub async fn try_dequeue(&self) -> Option<AudioSegment> {
        self.rx.lock().await.try_recv().ok()
    }

    /// Mark a segment fully processed (transcribed or dead-lettered),
    /// releasing it from the settling barrier.
    pub fn mark_done(&self, segment: &AudioSegment) {
        self.pending.remove(segment);
    }

    pub fn pending(&self) -> Arc<PendingSegments> {
        self.pending.clone()
    }
}
