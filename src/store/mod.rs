//! Persisted state: segment ledger, daily transcript logs, summary
//! artifacts, sync-status table, and the dead-letter area.
//!
//! Everything is newline-delimited JSON or whole-file JSON artifacts,
//! append-only or upsert-by-id. Destructive rewrites happen only through the
//! retention policy, which deletes aged raw audio and never text.

pub mod daily_log;
pub mod dead_letter;
pub mod ledger;
pub mod summaries;
pub mod sync_state;

use thiserror::Error;

pub use daily_log::DailyLogStore;
pub use dead_letter::{DeadLetter, DeadLetterRecord};
pub use ledger::{LedgerEntry, SegmentLedger, SegmentState};
pub use summaries::SummaryStore;
pub use sync_state::SyncStateTable;

/// Errors from the persisted-state layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
