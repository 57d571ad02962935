//! Segment hand-off and transcription workers.

pub mod queue;
pub mod workers;

pub use queue::{segment_queue, PendingSegments, QueueError, SegmentConsumer, SegmentQueue};
pub use workers::{spawn_workers, WorkerContext};
