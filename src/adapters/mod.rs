//! Adapter interfaces for external systems.
//!
//! The pipeline treats its three external collaborators as black boxes
//! behind traits: the speech-to-text engine, the summarization model, and
//! the document store. Error enums distinguish transient failures (retried
//! under the shared policy) from permanent ones (surfaced immediately).

pub mod chat;
pub mod docstore;
pub mod whisper;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use chat::ChatSummarizer;
pub use docstore::RestDocumentStore;
pub use whisper::WhisperCliEngine;

/// Output of a transcription call.
#[derive(Debug, Clone)]
pub struct Transcription {
    pub text: String,

    /// Engine-reported confidence (0.0 - 1.0)
    pub confidence: f32,
}

/// Errors from the transcription engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transcription engine unavailable: {0}")]
    Unavailable(String),

    #[error("transcription timed out after {0:?}")]
    Timeout(Duration),

    #[error("transcription failed: {0}")]
    Failed(String),
}

impl EngineError {
    /// Momentary hiccups worth retrying; `Failed` is not (bad audio stays
    /// bad).
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Unavailable(_) | EngineError::Timeout(_))
    }
}

/// Speech-to-text engine: audio in, text out.
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn transcribe(
        &self,
        audio_path: &Path,
        language_hint: &str,
    ) -> Result<Transcription, EngineError>;
}

/// Errors from the summarization engine.
#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("summarization rate limited")]
    RateLimited,

    #[error("summarization request timed out")]
    Timeout,

    #[error("summarization authentication failed: {0}")]
    Auth(String),

    #[error("summarization failed: {0}")]
    Api(String),
}

impl SummarizeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SummarizeError::RateLimited | SummarizeError::Timeout)
    }
}

/// Style knobs forwarded to the summarization engine.
#[derive(Debug, Clone)]
pub struct SummaryStyle {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Summarization model: text in, digest out.
#[async_trait]
pub trait Summarizer: Send + Sync {
    fn name(&self) -> &str;

    async fn summarize(&self, text: &str, style: &SummaryStyle) -> Result<String, SummarizeError>;
}

/// Errors from the document store.
#[derive(Debug, Error)]
pub enum SyncApiError {
    #[error("document store request failed: {0}")]
    Request(String),

    #[error("document store authentication failed: {0}")]
    Auth(String),

    #[error("remote document not found: {0}")]
    NotFound(String),
}

impl SyncApiError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncApiError::Request(_))
    }
}

/// Handle to a remote document.
#[derive(Debug, Clone)]
pub struct RemoteDoc {
    pub remote_id: String,
    pub revision: String,
}

/// Remote document store.
///
/// `fetch` exists so a conflicting remote version can be retained locally;
/// the dispatcher never overwrites or discards either side of a conflict.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn name(&self) -> &str;

    /// Create (`remote_id: None`) or update a document. Returns the new
    /// remote id and revision.
    async fn upsert(&self, remote_id: Option<&str>, content: &str)
        -> Result<RemoteDoc, SyncApiError>;

    /// Current revision of a remote document, for conflict detection.
    async fn get_revision(&self, remote_id: &str) -> Result<String, SyncApiError>;

    /// Fetch content and revision of a remote document.
    async fn fetch(&self, remote_id: &str) -> Result<(String, String), SyncApiError>;
}
