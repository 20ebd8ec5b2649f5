//! Change Scanner
//!
//! One pass queries the store for entries written since the cursor, pages
//! through them and hands each to the materializer.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::cursor::SyncCursor;
use super::materializer::{FileMaterializer, Materialized};
use crate::error::Result;
use crate::store::{EntryStore, ScrollPage};

/// Counters of a finished pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    /// Non-empty pages processed
    pub pages: u64,
    /// Files (re)written
    pub written: u64,
    /// Entries whose local file was already current
    pub skipped: u64,
    /// Entries that could not be materialized
    pub failed: u64,
}

/// How a pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Every page was processed
    Completed(PassReport),
    /// The pass saw its termination signal and stopped early
    Terminated,
}

/// Runs change-scan passes
pub struct ChangeScanner {
    store: Arc<dyn EntryStore>,
    materializer: Arc<FileMaterializer>,
    page_size: usize,
    keep_alive: Duration,
}

impl ChangeScanner {
    pub fn new(
        store: Arc<dyn EntryStore>,
        materializer: Arc<FileMaterializer>,
        page_size: usize,
        keep_alive: Duration,
    ) -> Self {
        Self {
            store,
            materializer,
            page_size: page_size.max(1),
            keep_alive,
        }
    }

    /// Run one pass from `cursor`.
    ///
    /// The store's latest commit sequence is read before the search, so
    /// every write committed up to it is visible to the search; the cursor
    /// moves just past it once the first page is in hand. Writes still
    /// waiting for the store's lock commit with a later sequence and fall to
    /// the next pass. A pass that fails or is terminated puts the cursor
    /// back, so the entries it did not reach are picked up by the next one.
    pub async fn run_pass(
        &self,
        cursor: &mut SyncCursor,
        cancel: &CancellationToken,
    ) -> Result<PassOutcome> {
        let since = cursor.next_sequence();
        let high_water = self.store.last_sequence().await?;

        let first = self
            .store
            .search_changed_since(since, self.page_size, self.keep_alive)
            .await?;
        cursor.advance(high_water + 1);
        tracing::debug!("Scanning changes from seq {} (committed up to {})", since, high_water);

        let scroll_id = first.scroll_id.clone();
        let result = self.drain(first, cancel).await;

        if let Err(e) = self.store.clear_scroll(&scroll_id).await {
            tracing::warn!("Failed to clear scroll {}: {}", scroll_id, e);
        }

        match &result {
            Ok(PassOutcome::Completed(report)) => {
                tracing::debug!(
                    "Scan finished: {} written, {} skipped, {} failed",
                    report.written,
                    report.skipped,
                    report.failed
                );
            }
            Ok(PassOutcome::Terminated) => {
                tracing::info!("Terminated file updater pass");
                cursor.rewind(since);
            }
            Err(_) => cursor.rewind(since),
        }

        result
    }

    async fn drain(&self, mut page: ScrollPage, cancel: &CancellationToken) -> Result<PassOutcome> {
        let mut report = PassReport::default();

        loop {
            if cancel.is_cancelled() {
                return Ok(PassOutcome::Terminated);
            }
            if page.entries.is_empty() {
                return Ok(PassOutcome::Completed(report));
            }

            report.pages += 1;
            for entry in &page.entries {
                match self.materializer.materialize(entry).await {
                    Ok(Materialized::Written(_)) => report.written += 1,
                    Ok(Materialized::Skipped(_)) => report.skipped += 1,
                    Err(e) => {
                        tracing::warn!("Failed to update {}: {}", entry.path, e);
                        report.failed += 1;
                    }
                }
            }

            page = self.store.scroll(&page.scroll_id, self.keep_alive).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use tempfile::tempdir;

    fn scanner(store: &Arc<SqliteStore>, dir: &std::path::Path, page_size: usize) -> ChangeScanner {
        ChangeScanner::new(
            Arc::clone(store) as Arc<dyn EntryStore>,
            Arc::new(FileMaterializer::new(dir)),
            page_size,
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_pass_writes_all_pages() {
        let store = Arc::new(SqliteStore::open_in_memory("configsync").unwrap());
        for i in 0..5 {
            store.put(&format!("dir/{}.conf", i), b"x").await.unwrap();
        }

        let dir = tempdir().unwrap();
        let scanner = scanner(&store, dir.path(), 2);
        let mut cursor = SyncCursor::new();

        let outcome = scanner.run_pass(&mut cursor, &CancellationToken::new()).await.unwrap();
        let PassOutcome::Completed(report) = outcome else {
            panic!("pass did not complete");
        };
        assert_eq!(report.written, 5);
        assert_eq!(report.pages, 3);
        assert_eq!(cursor.next_sequence(), 6);
        for i in 0..5 {
            assert!(dir.path().join(format!("dir/{}.conf", i)).exists());
        }
        assert_eq!(store.open_scrolls().await, 0);
    }

    #[tokio::test]
    async fn test_second_pass_is_incremental() {
        let store = Arc::new(SqliteStore::open_in_memory("configsync").unwrap());
        store.put("a.txt", b"1").await.unwrap();

        let dir = tempdir().unwrap();
        let scanner = scanner(&store, dir.path(), 1);
        let mut cursor = SyncCursor::new();
        let token = CancellationToken::new();

        scanner.run_pass(&mut cursor, &token).await.unwrap();
        store.put("b.txt", b"2").await.unwrap();

        let outcome = scanner.run_pass(&mut cursor, &token).await.unwrap();
        let PassOutcome::Completed(report) = outcome else {
            panic!("pass did not complete");
        };
        // a.txt is older than the cursor and not revisited
        assert_eq!(report.written, 1);
        assert_eq!(report.skipped, 0);
        assert_eq!(std::fs::read(dir.path().join("b.txt")).unwrap(), b"2");
    }

    #[tokio::test]
    async fn test_cancelled_pass_terminates_and_rewinds() {
        let store = Arc::new(SqliteStore::open_in_memory("configsync").unwrap());
        store.put("a.txt", b"1").await.unwrap();

        let dir = tempdir().unwrap();
        let scanner = scanner(&store, dir.path(), 1);
        let mut cursor = SyncCursor::new();
        let token = CancellationToken::new();
        token.cancel();

        let outcome = scanner.run_pass(&mut cursor, &token).await.unwrap();
        assert_eq!(outcome, PassOutcome::Terminated);
        assert_eq!(cursor.next_sequence(), 0);
        assert!(!dir.path().join("a.txt").exists());
        assert_eq!(store.open_scrolls().await, 0);

        let outcome = scanner.run_pass(&mut cursor, &CancellationToken::new()).await.unwrap();
        assert!(matches!(outcome, PassOutcome::Completed(r) if r.written == 1));
    }

    #[tokio::test]
    async fn test_bad_entry_does_not_abort_pass() {
        let store = Arc::new(SqliteStore::open_in_memory("configsync").unwrap());
        store.put("../..", b"no file name").await.unwrap();
        store.put("good.conf", b"ok").await.unwrap();

        let dir = tempdir().unwrap();
        let scanner = scanner(&store, dir.path(), 10);
        let mut cursor = SyncCursor::new();

        let outcome = scanner.run_pass(&mut cursor, &CancellationToken::new()).await.unwrap();
        let PassOutcome::Completed(report) = outcome else {
            panic!("pass did not complete");
        };
        assert_eq!(report.failed, 1);
        assert_eq!(report.written, 1);
        assert!(dir.path().join("good.conf").exists());
    }
}
