//! Pause/resume/shutdown signaling.
//!
//! The control plane is an explicit handle cloned into every long-running
//! task rather than a hidden global flag, so tests can drive pause/resume
//! deterministically.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

/// Process-wide run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Capturing and transcribing
    Running,

    /// Capture discards samples, workers stop dequeuing, scheduler timer
    /// suspended; in-flight work completes
    Paused,

    /// Drain and exit
    ShuttingDown,
}

/// Cloneable pause/resume/shutdown handle.
#[derive(Debug, Clone)]
pub struct ControlPlane {
    tx: Arc<watch::Sender<RunState>>,
    rx: watch::Receiver<RunState>,
}

impl Default for ControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlPlane {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(RunState::Running);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn state(&self) -> RunState {
        *self.rx.borrow()
    }

    pub fn is_paused(&self) -> bool {
        self.state() == RunState::Paused
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state() == RunState::ShuttingDown
    }

    /// Pause the pipeline. No-op unless currently running.
    pub fn pause(&self) {
        self.tx.send_if_modified(|state| {
            if *state == RunState::Running {
                info!("pipeline paused");
                *state = RunState::Paused;
                true
            } else {
                false
            }
        });
    }

    /// Resume a paused pipeline. No-op unless currently paused.
    pub fn resume(&self) {
        self.tx.send_if_modified(|state| {
            if *state == RunState::Paused {
                info!("pipeline resumed");
                *state = RunState::Running;
                true
            } else {
                false
            }
        });
    }

    /// Begin shutdown. Irreversible.
    pub fn shutdown(&self) {
        self.tx.send_if_modified(|state| {
            if *state != RunState::ShuttingDown {
                info!("pipeline shutting down");
                *state = RunState::ShuttingDown;
                true
            } else {
                false
            }
        });
    }

    /// Subscribe to state changes.
    pub fn watch(&self) -> watch::Receiver<RunState> {
        self.tx.subscribe()
    }

    /// Wait until the pipeline is running or shutting down.
    ///
    /// Returns the state that unblocked the wait, so callers can
    /// distinguish resume from shutdown.
    pub async fn wait_until_running(&self) -> RunState {
        let mut rx = self.watch();

        loop {
            let current = *rx.borrow_and_update();
            match current {
                RunState::Running => return RunState::Running,
                RunState::ShuttingDown => return RunState::ShuttingDown,
                RunState::Paused => {
                    if rx.changed().await.is_err() {
                        return RunState::ShuttingDown;
                    }
                }
            }
        }
    }
}
