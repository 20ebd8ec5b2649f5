//! Local Synchronization Module
//!
//! Everything that runs on one node to bring its configuration directory in
//! line with the shared store: the scan cursor, the change scanner, the file
//! materializer and the periodic scheduler.

pub mod cursor;
pub mod materializer;
pub mod scanner;
pub mod scheduler;

pub use cursor::SyncCursor;
pub use materializer::{FileMaterializer, Materialized};
pub use scanner::{ChangeScanner, PassOutcome, PassReport};
pub use scheduler::{SchedulerState, SchedulerStatus, UpdaterScheduler};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::cluster::NodeActions;
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::store::{EntryStore, Sequence};

/// Per-node scan state shared by scheduled and on-demand passes
pub struct LocalSync {
    store: Arc<dyn EntryStore>,
    materializer: Arc<FileMaterializer>,
    /// Held for the whole pass, so passes never overlap on one node
    cursor: Mutex<SyncCursor>,
    page_size: usize,
    keep_alive: Duration,
}

impl LocalSync {
    pub fn new(store: Arc<dyn EntryStore>, config: &SyncConfig) -> Self {
        Self {
            store,
            materializer: Arc::new(FileMaterializer::new(config.config_path.clone())),
            cursor: Mutex::new(SyncCursor::new()),
            page_size: config.scroll_size,
            keep_alive: config
                .scroll_time
                .as_duration()
                .unwrap_or(Duration::from_secs(60)),
        }
    }

    pub fn store(&self) -> &Arc<dyn EntryStore> {
        &self.store
    }

    pub fn materializer(&self) -> &FileMaterializer {
        &self.materializer
    }

    /// First commit sequence the next pass reads
    pub async fn next_sequence(&self) -> Sequence {
        self.cursor.lock().await.next_sequence()
    }

    /// Run one pass, waiting for any pass already in progress
    pub async fn run_pass(&self, cancel: &CancellationToken) -> Result<PassOutcome> {
        let mut cursor = tokio::select! {
            guard = self.cursor.lock() => guard,
            _ = cancel.cancelled() => return Ok(PassOutcome::Terminated),
        };

        let scanner = ChangeScanner::new(
            Arc::clone(&self.store),
            Arc::clone(&self.materializer),
            self.page_size,
            self.keep_alive,
        );
        scanner.run_pass(&mut cursor, cancel).await
    }

    /// Run one pass now, independent of the scheduler
    pub async fn flush(&self) -> Result<PassReport> {
        match self.run_pass(&CancellationToken::new()).await? {
            PassOutcome::Completed(report) => Ok(report),
            PassOutcome::Terminated => Err(Error::Cancelled),
        }
    }
}

/// The node-local side of the cluster-wide actions
pub struct SyncNode {
    local: Arc<LocalSync>,
    scheduler: Arc<UpdaterScheduler>,
}

impl SyncNode {
    pub fn new(local: Arc<LocalSync>, scheduler: Arc<UpdaterScheduler>) -> Self {
        Self { local, scheduler }
    }

    pub fn local(&self) -> &Arc<LocalSync> {
        &self.local
    }

    pub fn scheduler(&self) -> &Arc<UpdaterScheduler> {
        &self.scheduler
    }
}

#[async_trait::async_trait]
impl NodeActions for SyncNode {
    async fn flush_local(&self) -> Result<PassReport> {
        let report = self.local.flush().await?;
        tracing::info!(
            "Flushed configuration files: {} written, {} skipped, {} failed",
            report.written,
            report.skipped,
            report.failed
        );
        Ok(report)
    }

    async fn reset_local(&self) -> Result<()> {
        self.scheduler.reset().await?;
        tracing::info!("File updater reset");
        Ok(())
    }
}
