//! Configuration loading and storage paths.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (DAYBOOK_HOME for the state directory)
//! 2. Config file (daybook.yaml, or the path given on the command line)
//! 3. Defaults (~/.daybook)
//!
//! API keys are read from the environment only (OPENAI_API_KEY), never from
//! the config file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::retry::RetryPolicy;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub transcription: TranscriptionConfig,
    pub summary: SummaryConfig,
    pub sync: SyncConfig,
    pub storage: StorageConfig,
    pub retry: RetryPolicy,

    /// How long shutdown waits for queued segments to drain (seconds).
    /// Anything left after the timeout stays persisted for recovery.
    pub shutdown_timeout_secs: u64,
}

/// Audio capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,

    /// Target segment duration in seconds
    pub segment_duration_secs: u64,

    /// RMS level below which a window counts as silence
    pub silence_threshold: f32,

    /// Trailing silence that finalizes a segment early (seconds)
    pub silence_duration_secs: f64,

    /// Minimum buffered audio before a silence-triggered finalize (seconds)
    pub min_audio_duration_secs: f64,

    /// Noise gate used for the voiced-content profile (below silence_threshold)
    pub noise_gate_threshold: f32,

    /// Segments with a voiced-window ratio below this are discarded, not queued
    pub min_voiced_ratio: f32,

    /// Input device name (None = system default)
    pub device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            segment_duration_secs: 300,
            silence_threshold: 0.02,
            silence_duration_secs: 5.0,
            min_audio_duration_secs: 3.0,
            noise_gate_threshold: 0.015,
            min_voiced_ratio: 0.1,
            device: None,
        }
    }
}

/// Queue overflow behavior when transcription falls behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Capture blocks on a full queue (the backpressure point)
    Block,

    /// Enqueue fails; the segment is recorded to the dead-letter area
    Drop,
}

/// Transcription worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Number of concurrent transcription workers
    pub workers: usize,

    /// Language hint passed to the engine
    pub language: String,

    /// Whisper model name
    pub model: String,

    /// Per-call engine timeout (seconds)
    pub timeout_secs: u64,

    /// Segment queue capacity. The default holds about ten minutes of audio
    /// at the default segment duration.
    pub queue_capacity: usize,

    /// What happens when the queue is full
    pub overflow: OverflowPolicy,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            language: "en".to_string(),
            model: "base".to_string(),
            timeout_secs: 600,
            queue_capacity: 2,
            overflow: OverflowPolicy::Block,
        }
    }
}

/// Summary generation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Generate a daily summary at `summary_time`
    pub daily_summary: bool,

    /// Also generate top-of-hour summaries
    pub hourly_summary: bool,

    /// Daily summary time, "HH:MM"
    pub summary_time: String,

    /// Model passed to the summarization engine
    pub model: String,

    pub max_tokens: u32,
    pub temperature: f32,

    /// Transcript input cap in characters; longer windows are truncated
    pub max_input_chars: usize,

    /// How long a summary waits for in-flight transcription covering its
    /// window before proceeding (seconds)
    pub settle_timeout_secs: u64,

    /// Base URL of the OpenAI-compatible API
    pub api_base: String,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            daily_summary: true,
            hourly_summary: false,
            summary_time: "23:00".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 500,
            temperature: 0.3,
            max_input_chars: 8000,
            settle_timeout_secs: 30,
            api_base: "https://api.openai.com/v1".to_string(),
        }
    }
}

impl SummaryConfig {
    /// Parse `summary_time` into (hour, minute).
    pub fn summary_time_parts(&self) -> Result<(u32, u32)> {
        let (h, m) = self
            .summary_time
            .split_once(':')
            .with_context(|| format!("invalid summary_time '{}'", self.summary_time))?;

        let hour: u32 = h
            .parse()
            .with_context(|| format!("invalid summary_time hour '{}'", h))?;
        let minute: u32 = m
            .parse()
            .with_context(|| format!("invalid summary_time minute '{}'", m))?;

        if hour > 23 || minute > 59 {
            anyhow::bail!("summary_time '{}' out of range", self.summary_time);
        }

        Ok((hour, minute))
    }
}

/// Document sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Push finalized artifacts to the document store
    pub enabled: bool,

    /// Document store base URL
    pub endpoint: Option<String>,

    /// Seconds between periodic sync passes
    pub interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            interval_secs: 300,
        }
    }
}

/// Local storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// State directory (None = $DAYBOOK_HOME or ~/.daybook)
    pub base_dir: Option<PathBuf>,

    /// Days to keep dead-letter audio before age-based deletion.
    /// Applies to raw audio only, never to text.
    pub max_audio_age_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            max_audio_age_days: 7,
        }
    }
}

/// Resolved storage layout under the state directory.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    pub base: PathBuf,
    pub audio: PathBuf,
    pub transcripts: PathBuf,
    pub summaries: PathBuf,
    pub dead_letter: PathBuf,
    pub conflicts: PathBuf,
}

impl StoragePaths {
    pub fn ledger(&self) -> PathBuf {
        self.base.join("segments.jsonl")
    }

    pub fn sync_state(&self) -> PathBuf {
        self.base.join("sync_state.jsonl")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.base.join("daybook.lock")
    }

    /// Create all storage directories.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.base,
            &self.audio,
            &self.transcripts,
            &self.summaries,
            &self.dead_letter,
            &self.conflicts,
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from a YAML file, or defaults if it is absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let default_path = PathBuf::from("daybook.yaml");
        let path = path.unwrap_or(&default_path);

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Resolve the state directory: config > $DAYBOOK_HOME > ~/.daybook.
    pub fn home_dir(&self) -> Result<PathBuf> {
        if let Some(ref base) = self.storage.base_dir {
            return Ok(base.clone());
        }

        if let Ok(home) = std::env::var("DAYBOOK_HOME") {
            return Ok(PathBuf::from(home));
        }

        Ok(dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(".daybook"))
    }

    /// Resolve the full storage layout.
    pub fn storage_paths(&self) -> Result<StoragePaths> {
        let base = self.home_dir()?;

        Ok(StoragePaths {
            audio: base.join("audio"),
            transcripts: base.join("transcripts"),
            summaries: base.join("summaries"),
            dead_letter: base.join("deadletter"),
            conflicts: base.join("conflicts"),
            base,
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            transcription: TranscriptionConfig::default(),
            summary: SummaryConfig::default(),
            sync: SyncConfig::default(),
            storage: StorageConfig::default(),
            retry: RetryPolicy::default(),
            shutdown_timeout_secs: 30,
        }
    }
}
