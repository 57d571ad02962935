//! daybook - local-first ambient transcription with scheduled summaries
//!
//! Continuously captures microphone audio, splits it into bounded segments,
//! transcribes each segment, accumulates per-date transcript logs, and
//! generates scheduled AI summaries that can be synced to an external
//! document store. Raw audio never leaves the machine; only derived text is
//! sent to the summarization and document APIs.
//!
//! # Architecture
//!
//! The pipeline is a set of cooperating tasks joined by a bounded queue:
//! capture → segment queue → transcription workers → daily logs →
//! (scheduler) → summary builder → sync dispatcher. Crash safety comes from
//! an append-only segment ledger: every finalized segment is recorded before
//! it is queued, state changes are appended as events, and startup replays
//! the ledger to re-queue anything unfinished without duplicating work.
//!
//! # Modules
//!
//! - `adapters`: External collaborators (whisper CLI, chat summarizer,
//!   document store)
//! - `capture`: Audio sources, silence detection, segment writer
//! - `pipeline`: Segment queue and transcription worker pool
//! - `store`: Persisted state (ledger, daily logs, summaries, sync table,
//!   dead-letter area)
//! - `scheduler` / `summary`: Boundary state machine and summary generation
//! - `sync`: Idempotent, conflict-preserving document sync
//! - `control`: Explicit pause/resume/shutdown handle
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (build with --features mic)
//! daybook run
//!
//! # Force a summary for a date
//! daybook summarize 2024-03-01
//!
//! # Explain transcript gaps
//! daybook dead-letter
//! ```

pub mod adapters;
pub mod capture;
pub mod cli;
pub mod config;
pub mod control;
pub mod core;
pub mod domain;
pub mod pipeline;
pub mod scheduler;
pub mod store;
pub mod summary;
pub mod sync;

// Re-export main types at crate root for convenience
pub use config::AppConfig;
pub use control::{ControlPlane, RunState};
pub use crate::core::{Clock, Daemon, ManualClock, RetryPolicy, SharedClock, SystemClock};
pub use domain::{
    AudioSegment, EntryRange, SegmentId, Summary, SummaryKind, SyncRecord, SyncStatus,
    TranscriptEntry,
};

// Pipeline building blocks
pub use capture::{AudioSource, ChannelSource, SegmentWriter};
pub use pipeline::{segment_queue, SegmentConsumer, SegmentQueue};
pub use scheduler::{ManualRequest, SchedulerState, SummaryScheduler};
pub use store::{DailyLogStore, DeadLetter, SegmentLedger, SummaryStore, SyncStateTable};
pub use summary::SummaryBuilder;
pub use sync::{SyncArtifact, SyncDispatcher};
