//! Command-line interface for daybook.
//!
//! `run` starts the capture daemon; the other commands inspect or operate
//! on the persisted state of an existing installation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};

use crate::adapters::{ChatSummarizer, SummaryStyle};
use crate::config::AppConfig;
use crate::core::clock::SystemClock;
use crate::domain::{SummaryKind, SyncStatus};
use crate::pipeline::queue::PendingSegments;
use crate::store::{DailyLogStore, DeadLetter, SegmentLedger, SummaryStore, SyncStateTable};
use crate::summary::SummaryBuilder;

/// daybook - local-first ambient transcription with scheduled summaries
#[derive(Parser, Debug)]
#[command(name = "daybook")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the config file (default: daybook.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the capture/transcription daemon
    Run,

    /// Show pipeline state: segments, transcripts, summaries, sync
    Status,

    /// Generate a manual summary for a date or an explicit window
    Summarize {
        /// Date to summarize (default: today)
        date: Option<NaiveDate>,

        /// Window start (RFC 3339), overrides the date
        #[arg(long, requires = "to")]
        from: Option<DateTime<Utc>>,

        /// Window end (RFC 3339)
        #[arg(long, requires = "from")]
        to: Option<DateTime<Utc>>,
    },

    /// List segments that permanently failed transcription
    DeadLetter {
        /// Maximum number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// List artifacts with unresolved sync conflicts
    Conflicts,

    /// Show the resolved configuration
    Config,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = AppConfig::load(self.config.as_deref())?;

        match self.command {
            Commands::Run => run_daemon(config).await,
            Commands::Status => show_status(config).await,
            Commands::Summarize { date, from, to } => summarize(config, date, from, to).await,
            Commands::DeadLetter { limit } => show_dead_letter(config, limit).await,
            Commands::Conflicts => show_conflicts(config).await,
            Commands::Config => show_config(config),
        }
    }
}

#[cfg(feature = "mic")]
async fn run_daemon(config: AppConfig) -> Result<()> {
    use crate::control::ControlPlane;
    use crate::core::daemon::Daemon;

    let control = ControlPlane::new();
    let source = crate::capture::device::open_microphone(&config.audio)?;
    let daemon = Daemon::from_config(config);

    let signal_control = control.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_control.shutdown();
        }
    });

    daemon.run(source, control).await
}

#[cfg(not(feature = "mic"))]
async fn run_daemon(_config: AppConfig) -> Result<()> {
    anyhow::bail!("this build has no microphone support; rebuild with `--features mic`")
}

async fn show_status(config: AppConfig) -> Result<()> {
    let paths = config.storage_paths()?;

    let ledger = SegmentLedger::new(paths.ledger());
    let status = ledger.status().await?;

    println!("Segments");
    println!("  pending:       {}", status.pending);
    println!("  transcribed:   {}", status.transcribed);
    println!("  dead-lettered: {}", status.dead_lettered);
    println!("  dropped:       {}", status.dropped);

    let daily_log = DailyLogStore::new(paths.transcripts.clone());
    let dates = daily_log.dates().await?;
    println!("\nTranscripts: {} day(s)", dates.len());
    if let Some(latest) = dates.last() {
        let entries = daily_log.snapshot(*latest).await?;
        println!("  latest: {} ({} entries)", latest, entries.len());
    }

    let summaries = SummaryStore::new(paths.summaries.clone());
    let all = summaries.list().await?;
    println!("\nSummaries: {}", all.len());
    if let Some(last) = summaries.last_of_kind(SummaryKind::Daily).await? {
        println!("  last daily: {}", last.period_start.format("%Y-%m-%d"));
    }

    let sync_state = SyncStateTable::new(paths.sync_state());
    let records = sync_state.all().await?;
    if !records.is_empty() {
        let count = |status: SyncStatus| records.values().filter(|r| r.status == status).count();
        println!("\nSync");
        println!("  synced:    {}", count(SyncStatus::Synced));
        println!("  pending:   {}", count(SyncStatus::Pending));
        println!("  failed:    {}", count(SyncStatus::Failed));
        println!("  conflicts: {}", count(SyncStatus::Conflict));
    }

    Ok(())
}

async fn summarize(
    config: AppConfig,
    date: Option<NaiveDate>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Result<()> {
    let paths = config.storage_paths()?;

    let (period_start, period_end) = match (from, to) {
        (Some(from), Some(to)) => (from, to),
        _ => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            DailyLogStore::day_window(date)
        }
    };

    let builder = SummaryBuilder::new(
        Arc::new(DailyLogStore::new(paths.transcripts.clone())),
        Arc::new(SummaryStore::new(paths.summaries.clone())),
        Arc::new(ChatSummarizer::new(config.summary.api_base.clone())),
        Arc::new(PendingSegments::default()),
        config.retry.clone(),
        SummaryStyle {
            model: config.summary.model.clone(),
            max_tokens: config.summary.max_tokens,
            temperature: config.summary.temperature,
        },
        config.summary.max_input_chars,
        Duration::from_secs(config.summary.settle_timeout_secs),
        Arc::new(SystemClock),
    );

    let summary = builder
        .build(period_start, period_end, SummaryKind::Manual)
        .await?;

    println!(
        "Summary {} ({} entries)\n",
        summary.artifact_id,
        summary
            .source_entry_range
            .map(|r| r.entry_count)
            .unwrap_or(0)
    );
    println!("{}", summary.body);

    Ok(())
}

async fn show_dead_letter(config: AppConfig, limit: usize) -> Result<()> {
    let paths = config.storage_paths()?;
    let dead_letter = DeadLetter::new(paths.dead_letter.clone());

    let records = dead_letter.list().await?;
    if records.is_empty() {
        println!("No dead-lettered segments.");
        return Ok(());
    }

    for record in records.iter().rev().take(limit) {
        println!(
            "{}  segment {}  {:.1}s  {}",
            record.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            record.segment.id,
            record.segment.duration_secs,
            record.reason
        );
        println!("    audio: {}", record.retained_audio.display());
    }

    Ok(())
}

async fn show_conflicts(config: AppConfig) -> Result<()> {
    let paths = config.storage_paths()?;
    let sync_state = SyncStateTable::new(paths.sync_state());

    let mut conflicts: Vec<_> = sync_state
        .all()
        .await?
        .into_values()
        .filter(|r| r.status == SyncStatus::Conflict)
        .collect();
    conflicts.sort_by(|a, b| a.artifact_id.cmp(&b.artifact_id));

    if conflicts.is_empty() {
        println!("No sync conflicts.");
        return Ok(());
    }

    println!("Conflicting artifacts (both versions under {}):", paths.conflicts.display());
    for record in conflicts {
        println!(
            "  {}  {}",
            record.artifact_id,
            record.error.as_deref().unwrap_or("")
        );
    }

    Ok(())
}

fn show_config(config: AppConfig) -> Result<()> {
    let paths = config.storage_paths()?;
    println!("state directory: {}", paths.base.display());
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}
