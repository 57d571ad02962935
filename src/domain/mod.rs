//! Data structures shared across the pipeline.
//!
//! Everything here is plain data: segments produced by capture, transcript
//! entries accumulated per day, generated summaries, and sync records
//! tracking external document state.

pub mod segment;
pub mod summary;
pub mod sync;
pub mod transcript;

pub use segment::{AudioSegment, SegmentId};
pub use summary::{EntryRange, Summary, SummaryKind};
pub use sync::{SyncRecord, SyncStatus};
pub use transcript::TranscriptEntry;
