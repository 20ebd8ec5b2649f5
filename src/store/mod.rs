//! Entry Store Module
//!
//! The shared store is the single source of truth for configuration files.
//! `EntryStore` is the boundary the rest of the crate talks to; `SqliteStore`
//! is the embedded implementation.

pub mod entry;
mod sqlite;

pub use entry::{
    decode_identifier, encode_content, encode_identifier, now_millis, ConfigEntry, Sequence,
    Timestamp,
};
pub use sqlite::SqliteStore;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Outcome of deleting an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteResult {
    Deleted,
    NotFound,
}

impl DeleteResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeleteResult::Deleted => "deleted",
            DeleteResult::NotFound => "not_found",
        }
    }
}

/// Sort direction for listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    /// `desc` in any case means descending; anything else ascending
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("desc") {
            SortOrder::Desc
        } else {
            SortOrder::Asc
        }
    }
}

/// A listing request
#[derive(Debug, Clone)]
pub struct ListQuery {
    pub from: usize,
    pub size: usize,
    /// Fields to project; empty returns bare paths
    pub fields: Vec<String>,
    pub sort_field: String,
    pub sort_order: SortOrder,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            from: 0,
            size: 10,
            fields: Vec::new(),
            sort_field: entry::PATH.to_string(),
            sort_order: SortOrder::Asc,
        }
    }
}

/// Largest `from + size` a listing may ask for
pub const MAX_RESULT_WINDOW: usize = 10_000;

impl ListQuery {
    /// Reject pages that reach past [`MAX_RESULT_WINDOW`]
    pub fn validate(&self) -> Result<()> {
        let window = self.from.saturating_add(self.size);
        if window > MAX_RESULT_WINDOW {
            return Err(Error::InvalidRequest(format!(
                "Result window is too large, from + size must be less than or equal to: [{}] but was [{}]",
                MAX_RESULT_WINDOW, window
            )));
        }
        Ok(())
    }

    /// Parse a `field[:order]` sort expression
    pub fn with_sort(mut self, sort: &str) -> Self {
        let mut parts = sort.splitn(2, ':');
        self.sort_field = parts.next().unwrap_or(entry::PATH).to_string();
        self.sort_order = parts.next().map(SortOrder::parse).unwrap_or_default();
        self
    }
}

/// A page of listing results
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ListPage {
    /// Bare paths (no fields requested)
    Paths(Vec<String>),
    /// Projected documents
    Documents(Vec<serde_json::Map<String, serde_json::Value>>),
}

impl ListPage {
    pub fn len(&self) -> usize {
        match self {
            ListPage::Paths(p) => p.len(),
            ListPage::Documents(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One page of a change scan, with the token to fetch the next one
#[derive(Debug, Clone)]
pub struct ScrollPage {
    pub scroll_id: String,
    pub entries: Vec<ConfigEntry>,
}

/// The shared, searchable entry store.
///
/// Every operation provisions the collection on first use, so a cold store
/// needs no separate set-up step.
#[async_trait::async_trait]
pub trait EntryStore: Send + Sync {
    /// Create the collection if it does not exist yet
    async fn ensure_collection(&self) -> Result<()>;

    /// Check the store is reachable
    async fn ping(&self) -> Result<()>;

    /// Upsert a file, returning the stored entry with its assigned timestamp
    async fn put(&self, path: &str, content: &[u8]) -> Result<ConfigEntry>;

    /// Fetch a file's entry
    async fn get(&self, path: &str) -> Result<Option<ConfigEntry>>;

    /// Remove a file's entry
    async fn delete(&self, path: &str) -> Result<DeleteResult>;

    /// Paginated, sorted listing
    async fn list(&self, query: &ListQuery) -> Result<ListPage>;

    /// Sequence of the latest committed write, 0 for a store never written to
    async fn last_sequence(&self) -> Result<Sequence>;

    /// Open a scroll over every entry whose last write has a sequence of at
    /// least `since`, in commit order
    async fn search_changed_since(
        &self,
        since: Sequence,
        page_size: usize,
        keep_alive: Duration,
    ) -> Result<ScrollPage>;

    /// Fetch the next page of an open scroll
    async fn scroll(&self, scroll_id: &str, keep_alive: Duration) -> Result<ScrollPage>;

    /// Release a scroll context
    async fn clear_scroll(&self, scroll_id: &str) -> Result<()>;

    /// Read a cluster-wide setting
    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    /// Write (or with `None`, remove) a cluster-wide setting
    async fn put_setting(&self, key: &str, value: Option<&str>) -> Result<()>;
}

/// Reject paths that cannot name a file
pub fn validate_path(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(Error::InvalidRequest("path is empty.".into()));
    }
    Ok(())
}
