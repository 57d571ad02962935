//! Summary scheduling state machine.
//!
//! `Idle → Waiting(next_fire) → Firing → Idle`, driven by an injected clock
//! so boundary arithmetic, manual triggers, and missed-fire catch-up are all
//! testable without wall-clock waits. The async `run` loop only supplies the
//! timer and channel plumbing around the state machine.

use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::SummaryConfig;
use crate::control::{ControlPlane, RunState};
use crate::core::clock::SharedClock;
use crate::domain::{Summary, SummaryKind};
use crate::store::SummaryStore;
use crate::summary::{SummaryBuilder, SummaryError};

/// Scheduled boundary kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireKind {
    Hourly,
    Daily,
}

impl From<FireKind> for SummaryKind {
    fn from(kind: FireKind) -> Self {
        match kind {
            FireKind::Hourly => SummaryKind::Hourly,
            FireKind::Daily => SummaryKind::Daily,
        }
    }
}

/// Discoverable scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Waiting {
        next_fire: DateTime<Utc>,
        kind: FireKind,
    },
    Firing,
}

/// Out-of-band summary request (explicit window).
#[derive(Debug, Clone)]
pub struct ManualRequest {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

/// Cooperative timer state machine for scheduled summaries.
pub struct SummaryScheduler {
    daily_time: Option<(u32, u32)>,
    hourly: bool,

    builder: Arc<SummaryBuilder>,
    summaries: Arc<SummaryStore>,
    clock: SharedClock,
    control: ControlPlane,

    state: SchedulerState,
    catch_up_pending: bool,
}

impl SummaryScheduler {
    pub fn new(
        config: &SummaryConfig,
        builder: Arc<SummaryBuilder>,
        summaries: Arc<SummaryStore>,
        clock: SharedClock,
        control: ControlPlane,
    ) -> anyhow::Result<Self> {
        let daily_time = if config.daily_summary {
            Some(config.summary_time_parts()?)
        } else {
            None
        };

        Ok(Self {
            daily_time,
            hourly: config.hourly_summary,
            builder,
            summaries,
            clock,
            control,
            state: SchedulerState::Idle,
            catch_up_pending: false,
        })
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        match self.state {
            SchedulerState::Waiting { next_fire, .. } => Some(next_fire),
            _ => None,
        }
    }

    pub fn catch_up_pending(&self) -> bool {
        self.catch_up_pending
    }

    fn daily_fire_on(&self, date: chrono::NaiveDate) -> Option<DateTime<Utc>> {
        let (hour, minute) = self.daily_time?;
        date.and_hms_opt(hour, minute, 0).map(|n| n.and_utc())
    }

    /// The next boundary strictly after `now`, if any kind is enabled.
    pub fn next_boundary(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, FireKind)> {
        let mut candidates: Vec<(DateTime<Utc>, FireKind)> = Vec::new();

        if let Some(today) = self.daily_fire_on(now.date_naive()) {
            let next = if today > now {
                today
            } else {
                self.daily_fire_on(now.date_naive() + Duration::days(1))?
            };
            candidates.push((next, FireKind::Daily));
        }

        if self.hourly {
            candidates.push((truncate_to_hour(now) + Duration::hours(1), FireKind::Hourly));
        }

        candidates.into_iter().min_by_key(|(t, _)| *t)
    }

    /// The elapsed period a boundary covers.
    ///
    /// Daily fires summarize the previous calendar day; hourly fires the
    /// previous clock hour.
    pub fn period_for(
        &self,
        kind: FireKind,
        fired_at: DateTime<Utc>,
    ) -> (DateTime<Utc>, DateTime<Utc>) {
        match kind {
            FireKind::Daily => {
                let day = fired_at.date_naive() - Duration::days(1);
                let start = day.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();
                (start, start + Duration::days(1))
            }
            FireKind::Hourly => {
                let end = truncate_to_hour(fired_at);
                (end - Duration::hours(1), end)
            }
        }
    }

    /// The most recent boundary at or before `now`, and its period.
    fn latest_due_period(
        &self,
        kind: FireKind,
        now: DateTime<Utc>,
    ) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let boundary = match kind {
            FireKind::Daily => {
                let today = self.daily_fire_on(now.date_naive())?;
                if today <= now {
                    today
                } else {
                    self.daily_fire_on(now.date_naive() - Duration::days(1))?
                }
            }
            FireKind::Hourly => truncate_to_hour(now),
        };

        Some(self.period_for(kind, boundary))
    }

    fn enabled_kinds(&self) -> Vec<FireKind> {
        let mut kinds = Vec::new();
        if self.daily_time.is_some() {
            kinds.push(FireKind::Daily);
        }
        if self.hourly {
            kinds.push(FireKind::Hourly);
        }
        kinds
    }

    /// Transition Idle → Waiting for the next boundary.
    pub fn arm(&mut self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.next_boundary(now) {
            Some((next_fire, kind)) => {
                self.state = SchedulerState::Waiting { next_fire, kind };
                Some(next_fire)
            }
            None => {
                self.state = SchedulerState::Idle;
                None
            }
        }
    }

    /// Fire the armed boundary if it is due. Returns the generated summary,
    /// or None if nothing was due. The state machine ends back in Idle;
    /// callers re-arm for the next boundary.
    pub async fn fire_due(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Option<Summary>, SummaryError> {
        let (next_fire, kind) = match self.state {
            SchedulerState::Waiting { next_fire, kind } if now >= next_fire => (next_fire, kind),
            _ => return Ok(None),
        };

        self.state = SchedulerState::Firing;
        let (start, end) = self.period_for(kind, next_fire);

        let result = self.builder.build(start, end, kind.into()).await;
        self.state = SchedulerState::Idle;

        result.map(Some)
    }

    /// Handle an out-of-band request as a separate one-shot firing.
    ///
    /// The scheduled countdown is untouched: a Waiting state (and its
    /// next_fire) survives the manual firing.
    pub async fn fire_manual(&mut self, request: ManualRequest) -> Result<Summary, SummaryError> {
        let resume_state = self.state;
        self.state = SchedulerState::Firing;

        let result = self
            .builder
            .build(request.period_start, request.period_end, SummaryKind::Manual)
            .await;

        self.state = resume_state;
        result
    }

    /// Detect and repair missed boundaries after startup, resume, or a long
    /// suspension.
    ///
    /// At most one catch-up firing per kind, covering only the most recent
    /// missed period, so a long pause never turns into a summary storm. A
    /// kind with no prior summary has no baseline and is left alone.
    pub async fn catch_up(&mut self, now: DateTime<Utc>) -> Vec<Summary> {
        let mut generated = Vec::new();

        for kind in self.enabled_kinds() {
            let Some((start, end)) = self.latest_due_period(kind, now) else {
                continue;
            };

            let last = match self.summaries.last_of_kind(kind.into()).await {
                Ok(last) => last,
                Err(e) => {
                    warn!(error = %e, "failed to read summary store for catch-up");
                    continue;
                }
            };

            let missed = match last {
                Some(last) => last.period_end < end,
                None => false,
            };

            if !missed {
                continue;
            }

            self.catch_up_pending = true;
            info!(?kind, %start, %end, "missed boundary detected, issuing catch-up summary");

            match self.builder.build(start, end, kind.into()).await {
                Ok(summary) => generated.push(summary),
                Err(e) => warn!(error = %e, "catch-up summary failed"),
            }
        }

        self.catch_up_pending = false;
        generated
    }

    /// Drive the state machine with a real timer.
    pub async fn run(mut self, manual_rx: mpsc::Receiver<ManualRequest>) {
        info!("scheduler started");
        let mut manual_rx = Some(manual_rx);
        let mut control_rx = self.control.watch();

        // A restart may have slept through a boundary
        self.catch_up(self.clock.now()).await;

        loop {
            match self.control.state() {
                RunState::ShuttingDown => break,
                RunState::Paused => {
                    // Timer suspended; wait for resume or shutdown
                    if control_rx.changed().await.is_err() {
                        break;
                    }
                    if self.control.state() == RunState::Running {
                        self.catch_up(self.clock.now()).await;
                    }
                    continue;
                }
                RunState::Running => {}
            }

            let now = self.clock.now();
            let sleep_for = match self.arm(now) {
                Some(next_fire) => (next_fire - now)
                    .to_std()
                    .unwrap_or(std::time::Duration::ZERO),
                // Nothing scheduled; just wait for control or manual traffic
                None => std::time::Duration::from_secs(3600),
            };

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {
                    // The armed boundary is due by construction
                    let fire_at = self.next_fire_time().unwrap_or(now);
                    match self.fire_due(self.clock.now().max(fire_at)).await {
                        Ok(Some(summary)) => {
                            info!(artifact_id = %summary.artifact_id, "scheduled summary complete");
                        }
                        Ok(None) => {}
                        Err(e) => {
                            // No artifact for the period; keep scheduling
                            error!(error = %e, "scheduled summary failed");
                        }
                    }
                }
                changed = control_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                request = recv_manual(&mut manual_rx) => {
                    match request {
                        Some(request) => {
                            info!(
                                period_start = %request.period_start,
                                period_end = %request.period_end,
                                "manual summary requested"
                            );
                            if let Err(e) = self.fire_manual(request).await {
                                warn!(error = %e, "manual summary failed");
                            }
                        }
                        None => manual_rx = None,
                    }
                }
            }
        }

        info!("scheduler stopped");
    }
}

async fn recv_manual(rx: &mut Option<mpsc::Receiver<ManualRequest>>) -> Option<ManualRequest> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn truncate_to_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    t - Duration::minutes(t.minute() as i64)
        - Duration::seconds(t.second() as i64)
        - Duration::nanoseconds(t.nanosecond() as i64)
}
