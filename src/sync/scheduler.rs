//! Updater Scheduler
//!
//! Drives periodic change-scan passes. Each start opens a new generation
//! with its own termination token; reset cancels the running generation
//! and opens the next one.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::scanner::PassOutcome;
use super::LocalSync;
use crate::cluster::{HealthMonitor, HealthStatus};
use crate::config::TimeValue;
use crate::error::{Error, Result};
use crate::settings::ClusterSettings;

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// No generation is running
    Stopped,
    /// Waiting for the next pass
    Scheduled,
    /// A pass is in progress
    Running,
    /// The interval is negative; nothing is scheduled until the next reset
    Disabled,
}

/// Snapshot published on every state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    /// Generation the state belongs to
    pub generation: u64,
    /// Passes completed by this generation
    pub passes: u64,
    /// Interval in milliseconds the generation is using
    pub interval_ms: i64,
}

struct Cycle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Periodic driver of the change scanner
pub struct UpdaterScheduler {
    sync: Arc<LocalSync>,
    settings: Arc<ClusterSettings>,
    enabled: bool,
    /// Set once the node is going down; nothing starts after that
    closed: AtomicBool,
    cycle: Mutex<Option<Cycle>>,
    generation: AtomicU64,
    status: watch::Sender<SchedulerStatus>,
}

impl UpdaterScheduler {
    pub fn new(sync: Arc<LocalSync>, settings: Arc<ClusterSettings>, enabled: bool) -> Self {
        let (status, _) = watch::channel(SchedulerStatus {
            state: SchedulerState::Stopped,
            generation: 0,
            passes: 0,
            interval_ms: settings.default_flush_interval().millis(),
        });

        Self {
            sync,
            settings,
            enabled,
            closed: AtomicBool::new(false),
            cycle: Mutex::new(None),
            generation: AtomicU64::new(0),
            status,
        }
    }

    /// Whether this node runs the updater at all
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Current status
    pub fn status(&self) -> SchedulerStatus {
        *self.status.borrow()
    }

    /// Subscribe to status changes
    pub fn subscribe(&self) -> watch::Receiver<SchedulerStatus> {
        self.status.subscribe()
    }

    /// Start a new generation, cancelling the current one if any
    pub async fn start(self: &Arc<Self>) {
        let mut cycle = self.cycle.lock().await;
        if let Some(previous) = cycle.take() {
            previous.token.cancel();
        }

        if self.closed.load(Ordering::SeqCst) {
            tracing::debug!("Not starting file updater: shutting down");
            self.status.send_modify(|s| s.state = SchedulerState::Stopped);
            return;
        }

        if !self.enabled {
            tracing::debug!("File updater is disabled on this node");
            self.status.send_modify(|s| s.state = SchedulerState::Stopped);
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let interval = self.settings.flush_interval().await;
        self.status.send_replace(SchedulerStatus {
            state: SchedulerState::Scheduled,
            generation,
            passes: 0,
            interval_ms: interval.millis(),
        });

        let token = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(self).run(generation, token.clone(), interval));
        *cycle = Some(Cycle { token, handle });

        tracing::info!("File updater is started at {} intervals (generation {})", interval, generation);
    }

    /// Cancel the current generation and start a fresh one.
    ///
    /// A write already in progress in the old generation may still finish;
    /// it stops at its next page boundary.
    pub async fn reset(self: &Arc<Self>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        {
            let mut cycle = self.cycle.lock().await;
            if let Some(previous) = cycle.take() {
                previous.token.cancel();
            }
        }
        self.status.send_modify(|s| s.state = SchedulerState::Stopped);

        self.sync.store().ensure_collection().await?;
        self.start().await;
        Ok(())
    }

    /// Cancel the current generation and wait for it to exit
    pub async fn stop(&self) {
        let previous = self.cycle.lock().await.take();
        if let Some(previous) = previous {
            previous.token.cancel();
            if let Err(e) = previous.handle.await {
                tracing::warn!("File updater task failed: {}", e);
            }
        }
        self.status.send_modify(|s| s.state = SchedulerState::Stopped);
        tracing::info!("File updater stopped");
    }

    /// Stop for good: later starts are ignored and resets fail
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.stop().await;
    }

    /// Start once the cluster is ready, retrying on failure.
    ///
    /// Waits up to `wait` for a green cluster (a timeout only warns), makes
    /// sure the collection exists, then starts. Any failure is retried after
    /// `retry` until `shutdown` fires.
    pub fn start_when_ready(
        self: &Arc<Self>,
        health: Arc<HealthMonitor>,
        wait: Duration,
        retry: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                match scheduler.prepare(&health, wait).await {
                    Ok(()) => {
                        scheduler.start().await;
                        return;
                    }
                    Err(e) if e.is_retryable() => {
                        tracing::warn!(
                            "Could not start file updater. Retrying in {:?}: {}",
                            retry,
                            e
                        );
                    }
                    Err(e) => {
                        tracing::error!(
                            "Failed to start file updater. Retrying in {:?}: {}",
                            retry,
                            e
                        );
                    }
                }

                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(retry) => {}
                }
            }
        })
    }

    async fn prepare(&self, health: &HealthMonitor, wait: Duration) -> Result<()> {
        match health.wait_for(HealthStatus::Green, wait).await {
            Ok(_) => {}
            Err(Error::WaitTimeout(status)) => {
                tracing::warn!("Cluster is {} after {:?}; starting file updater anyway", status, wait);
            }
            Err(e) => return Err(e),
        }
        self.sync.store().ensure_collection().await
    }

    fn publish(&self, generation: u64, update: impl FnOnce(&mut SchedulerStatus)) {
        self.status.send_if_modified(|status| {
            if status.generation != generation {
                return false;
            }
            update(status);
            true
        });
    }

    async fn run(self: Arc<Self>, generation: u64, token: CancellationToken, mut interval: TimeValue) {
        loop {
            let Some(delay) = interval.as_duration() else {
                tracing::debug!("File updater is not scheduled (flush_interval {})", interval);
                self.publish(generation, |s| {
                    s.state = SchedulerState::Disabled;
                    s.interval_ms = interval.millis();
                });
                return;
            };

            self.publish(generation, |s| {
                s.state = SchedulerState::Scheduled;
                s.interval_ms = interval.millis();
            });

            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            self.publish(generation, |s| s.state = SchedulerState::Running);
            match self.sync.run_pass(&token).await {
                Ok(PassOutcome::Completed(report)) => {
                    tracing::debug!(
                        "File updater pass done: {} written, {} skipped, {} failed",
                        report.written,
                        report.skipped,
                        report.failed
                    );
                    self.publish(generation, |s| s.passes += 1);
                }
                Ok(PassOutcome::Terminated) => {
                    tracing::debug!("File updater generation {} terminated", generation);
                    return;
                }
                Err(e) => tracing::error!("Failed to process file updater: {}", e),
            }

            if token.is_cancelled() {
                return;
            }
            interval = self.settings.flush_interval().await;
        }
    }
}
