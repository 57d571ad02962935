//! Document sync: pushes finalized artifacts to the external store.
//!
//! Idempotent by artifact id with content-hash change detection, and
//! conflict-preserving: when the remote was modified by another writer, both
//! versions are kept locally and the record surfaces as `conflict`, never a
//! silent last-writer-wins.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{DocumentStore, SyncApiError};
use crate::control::ControlPlane;
use crate::core::clock::SharedClock;
use crate::core::retry::RetryPolicy;
use crate::domain::{SyncRecord, SyncStatus};
use crate::store::{DailyLogStore, StoreError, SummaryStore, SyncStateTable};

/// Errors from the sync layer.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("document store error: {0}")]
    Api(#[from] SyncApiError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// A local artifact ready to push.
#[derive(Debug, Clone)]
pub struct SyncArtifact {
    pub artifact_id: String,
    pub content: String,
}

impl SyncArtifact {
    pub fn new(artifact_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            artifact_id: artifact_id.into(),
            content: content.into(),
        }
    }

    /// Content hash (first 16 hex chars of SHA-256).
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.content.as_bytes());
        let digest = hasher.finalize();
        hex::encode(&digest[..8])
    }
}

/// Pushes artifacts to the document store and tracks their state.
pub struct SyncDispatcher {
    store: Arc<dyn DocumentStore>,
    state: SyncStateTable,
    conflicts_dir: PathBuf,
    retry: RetryPolicy,
    clock: SharedClock,
}

impl SyncDispatcher {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        state: SyncStateTable,
        conflicts_dir: PathBuf,
        retry: RetryPolicy,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            state,
            conflicts_dir,
            retry,
            clock,
        }
    }

    /// Sync one artifact. Always returns a record; failures are captured as
    /// record status rather than bubbling past the artifact they belong to.
    #[instrument(skip(self, artifact), fields(artifact_id = %artifact.artifact_id))]
    pub async fn sync(&self, artifact: &SyncArtifact) -> Result<SyncRecord, SyncError> {
        let mut record = self
            .state
            .get(&artifact.artifact_id)
            .await?
            .unwrap_or_else(|| SyncRecord::new(&artifact.artifact_id));

        let content_hash = artifact.content_hash();

        // Idempotence: unchanged and already synced means nothing to do
        if record.is_synced(&content_hash) {
            debug!("artifact unchanged, sync is a no-op");
            return Ok(record);
        }

        record.last_attempt = Some(self.clock.now());

        // Conflict detection: has the remote moved since we last wrote it?
        if let (Some(remote_id), Some(last_revision)) =
            (record.remote_id.clone(), record.last_revision.clone())
        {
            match self
                .retry
                .run(
                    |_| self.store.get_revision(&remote_id),
                    SyncApiError::is_transient,
                )
                .await
            {
                Ok(remote_revision) if remote_revision != last_revision => {
                    return self
                        .mark_conflict(record, artifact, &remote_id, &remote_revision)
                        .await;
                }
                Ok(_) => {}
                Err(SyncApiError::NotFound(_)) => {
                    // Remote deleted out from under us; recreate
                    debug!("remote document gone, will recreate");
                    record.remote_id = None;
                    record.last_revision = None;
                }
                Err(e) => {
                    return self.mark_failed(record, e).await;
                }
            }
        }

        let result = self
            .retry
            .run(
                |_| self.store.upsert(record.remote_id.as_deref(), &artifact.content),
                SyncApiError::is_transient,
            )
            .await;

        match result {
            Ok(doc) => {
                record.remote_id = Some(doc.remote_id);
                record.last_revision = Some(doc.revision);
                record.content_hash = Some(content_hash);
                record.status = SyncStatus::Synced;
                record.error = None;
                self.state.upsert(&record).await?;

                info!("artifact synced");
                Ok(record)
            }
            Err(e) => self.mark_failed(record, e).await,
        }
    }

    /// Conflict policy: keep both versions under the same artifact id and
    /// surface for manual resolution.
    async fn mark_conflict(
        &self,
        mut record: SyncRecord,
        artifact: &SyncArtifact,
        remote_id: &str,
        remote_revision: &str,
    ) -> Result<SyncRecord, SyncError> {
        tokio::fs::create_dir_all(&self.conflicts_dir).await.map_err(StoreError::from)?;

        let local_path = self
            .conflicts_dir
            .join(format!("{}.local.md", artifact.artifact_id));
        tokio::fs::write(&local_path, &artifact.content)
            .await
            .map_err(StoreError::from)?;

        match self.store.fetch(remote_id).await {
            Ok((remote_content, revision)) => {
                let remote_path = self
                    .conflicts_dir
                    .join(format!("{}.remote.{}.md", artifact.artifact_id, revision));
                tokio::fs::write(&remote_path, remote_content)
                    .await
                    .map_err(StoreError::from)?;
            }
            Err(e) => {
                warn!(error = %e, "could not fetch conflicting remote version");
            }
        }

        record.status = SyncStatus::Conflict;
        record.error = Some(format!(
            "remote revision {} differs from last synced {}",
            remote_revision,
            record.last_revision.as_deref().unwrap_or("(none)")
        ));
        self.state.upsert(&record).await?;

        warn!(remote_revision, "sync conflict, both versions retained");
        Ok(record)
    }

    /// Exhausted retries: mark failed and leave the artifact queued for the
    /// next periodic pass.
    async fn mark_failed(
        &self,
        mut record: SyncRecord,
        error: SyncApiError,
    ) -> Result<SyncRecord, SyncError> {
        record.status = SyncStatus::Failed;
        record.error = Some(error.to_string());
        self.state.upsert(&record).await?;

        warn!(error = %record.error.as_deref().unwrap_or(""), "sync failed, queued for next pass");
        Ok(record)
    }

    /// Sync a batch, isolating failures to their artifact.
    pub async fn sync_all(&self, artifacts: &[SyncArtifact]) -> SyncPassReport {
        let mut report = SyncPassReport::default();

        for artifact in artifacts {
            match self.sync(artifact).await {
                Ok(record) => match record.status {
                    SyncStatus::Synced => report.synced += 1,
                    SyncStatus::Conflict => report.conflicts += 1,
                    SyncStatus::Failed => report.failed += 1,
                    SyncStatus::Pending => {}
                },
                Err(e) => {
                    warn!(artifact_id = %artifact.artifact_id, error = %e, "sync pass error");
                    report.failed += 1;
                }
            }
        }

        report
    }
}

/// Outcome of one periodic sync pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncPassReport {
    pub synced: usize,
    pub conflicts: usize,
    pub failed: usize,
}

/// Collect the finalized artifacts eligible for sync: every stored summary,
/// plus daily logs for completed dates (today is still growing).
pub async fn collect_artifacts(
    daily_log: &DailyLogStore,
    summaries: &SummaryStore,
    today: NaiveDate,
) -> Result<Vec<SyncArtifact>, StoreError> {
    let mut artifacts = Vec::new();

    for summary in summaries.list().await? {
        let content = format!(
            "# Summary {} ({})\n\n{}\n",
            summary.period_start.format("%Y-%m-%d %H:%M"),
            summary.kind,
            summary.body
        );
        artifacts.push(SyncArtifact::new(summary.artifact_id.clone(), content));
    }

    for date in daily_log.dates().await? {
        if date >= today {
            continue;
        }
        if let Some(rendered) = daily_log.render(date).await? {
            artifacts.push(SyncArtifact::new(
                format!("daylog-{}", date.format("%Y-%m-%d")),
                rendered,
            ));
        }
    }

    Ok(artifacts)
}

/// Periodic sync task: runs a pass every `interval`, plus a final pass on
/// shutdown.
pub async fn run_sync_task(
    dispatcher: Arc<SyncDispatcher>,
    daily_log: Arc<DailyLogStore>,
    summaries: Arc<SummaryStore>,
    interval: std::time::Duration,
    clock: SharedClock,
    control: ControlPlane,
) {
    info!(interval_secs = interval.as_secs(), "sync task started");
    let mut control_rx = control.watch();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = control_rx.changed() => {
                if changed.is_err() || control.is_shutting_down() {
                    break;
                }
                continue;
            }
        }

        let today = clock.now().date_naive();
        match collect_artifacts(&daily_log, &summaries, today).await {
            Ok(artifacts) => {
                if artifacts.is_empty() {
                    continue;
                }
                let report = dispatcher.sync_all(&artifacts).await;
                info!(
                    synced = report.synced,
                    conflicts = report.conflicts,
                    failed = report.failed,
                    "sync pass complete"
                );
            }
            Err(e) => warn!(error = %e, "failed to collect artifacts for sync"),
        }
    }

    info!("sync task stopped");
}
