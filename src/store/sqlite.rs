//! SQLite Entry Store
//!
//! Embedded implementation of [`EntryStore`]. The database file can sit on
//! storage shared by all nodes; scroll contexts live in the opening process.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::SecondsFormat;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::entry::{self, encode_content, encode_identifier, now_millis, ConfigEntry, Sequence, Timestamp};
use super::{DeleteResult, EntryStore, ListPage, ListQuery, ScrollPage, SortOrder};
use crate::config::is_plain_identifier;
use crate::error::{Error, Result};

/// Snapshot of identifiers still to be returned by a scroll
struct ScrollContext {
    pending: VecDeque<String>,
    page_size: usize,
    expires_at: Instant,
}

/// Entry store backed by SQLite
pub struct SqliteStore {
    /// Database connection
    conn: Mutex<Connection>,
    /// Table holding the entries
    collection: String,
    /// Whether the tables are known to exist
    provisioned: AtomicBool,
    /// Open scroll contexts by scroll id
    scrolls: Mutex<HashMap<String, ScrollContext>>,
}

impl SqliteStore {
    /// Open (or create) the store database at `path`
    pub fn open(path: &Path, collection: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::with_connection(conn, collection)
    }

    /// Open a private in-memory store
    pub fn open_in_memory(collection: &str) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, collection)
    }

    fn with_connection(conn: Connection, collection: &str) -> Result<Self> {
        if !is_plain_identifier(collection) {
            return Err(Error::Config(format!("invalid collection name: {}", collection)));
        }

        Ok(Self {
            conn: Mutex::new(conn),
            collection: collection.to_string(),
            provisioned: AtomicBool::new(false),
            scrolls: Mutex::new(HashMap::new()),
        })
    }

    /// Name of the entry table
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Create the tables if this handle has not seen them yet
    fn provision(&self, conn: &Connection) -> Result<()> {
        if self.provisioned.load(Ordering::Acquire) {
            return Ok(());
        }

        let t = &self.collection;
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {t} (
                id TEXT PRIMARY KEY,
                path TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                seq INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_{t}_seq
                ON {t}(seq);

            CREATE TABLE IF NOT EXISTS {t}_sequence (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                value INTEGER NOT NULL
            );

            INSERT OR IGNORE INTO {t}_sequence (id, value) VALUES (1, 0);

            CREATE TABLE IF NOT EXISTS {t}_settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            "#
        ))?;

        self.provisioned.store(true, Ordering::Release);
        tracing::debug!("Collection {} is ready", t);
        Ok(())
    }

    fn fetch(conn: &Connection, collection: &str, id: &str) -> Result<Option<ConfigEntry>> {
        let entry = conn
            .query_row(
                &format!("SELECT path, content, timestamp FROM {} WHERE id = ?1", collection),
                params![id],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    async fn next_page(&self, scroll_id: &str, keep_alive: Duration) -> Result<ScrollPage> {
        let mut scrolls = self.scrolls.lock().await;

        let now = Instant::now();
        scrolls.retain(|_, context| context.expires_at > now);

        let context = scrolls
            .get_mut(scroll_id)
            .ok_or_else(|| Error::ScrollExpired(scroll_id.to_string()))?;
        context.expires_at = now + keep_alive;

        let conn = self.conn.lock().await;
        let mut entries = Vec::with_capacity(context.page_size);
        // Rows deleted since the snapshot are skipped without shortening the page
        while entries.len() < context.page_size {
            let Some(id) = context.pending.pop_front() else {
                break;
            };
            if let Some(entry) = Self::fetch(&conn, &self.collection, &id)? {
                entries.push(entry);
            }
        }

        Ok(ScrollPage {
            scroll_id: scroll_id.to_string(),
            entries,
        })
    }

    /// Number of open scroll contexts
    pub async fn open_scrolls(&self) -> usize {
        self.scrolls.lock().await.len()
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConfigEntry> {
    Ok(ConfigEntry {
        path: row.get(0)?,
        content: row.get(1)?,
        timestamp: row.get(2)?,
    })
}

fn project(entry: &ConfigEntry, fields: &[String]) -> Map<String, Value> {
    let mut doc = Map::new();
    for field in fields {
        let value = match field.as_str() {
            entry::PATH => Value::String(entry.path.clone()),
            entry::CONTENT => Value::String(entry.content.clone()),
            entry::TIMESTAMP => entry
                .written_at()
                .map(|t| Value::String(t.to_rfc3339_opts(SecondsFormat::Millis, true)))
                .unwrap_or(Value::Null),
            _ => Value::Null,
        };
        doc.insert(field.clone(), value);
    }
    doc
}

#[async_trait::async_trait]
impl EntryStore for SqliteStore {
    async fn ensure_collection(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        self.provision(&conn)
    }

    async fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn put(&self, path: &str, content: &[u8]) -> Result<ConfigEntry> {
        let mut conn = self.conn.lock().await;
        self.provision(&conn)?;

        let encoded = encode_content(content);
        let t = &self.collection;

        // Sequence and clock are read only once the database write lock is
        // held, so commit order across every handle on the file matches them
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let seq: Sequence = tx.query_row(
            &format!("UPDATE {t}_sequence SET value = value + 1 WHERE id = 1 RETURNING value"),
            [],
            |row| row.get(0),
        )?;
        // Same-millisecond rewrites still move the timestamp forward
        let timestamp: Timestamp = tx.query_row(
            &format!(
                r#"
                INSERT INTO {t} (id, path, content, timestamp, seq) VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(id) DO UPDATE SET
                    content = excluded.content,
                    timestamp = MAX(excluded.timestamp, {t}.timestamp + 1),
                    seq = excluded.seq
                RETURNING timestamp
                "#
            ),
            params![encode_identifier(path), path, encoded, now_millis(), seq],
            |row| row.get(0),
        )?;
        tx.commit()?;

        tracing::debug!("Stored {} at {} (seq {})", path, timestamp, seq);
        Ok(ConfigEntry {
            path: path.to_string(),
            content: encoded,
            timestamp,
        })
    }

    async fn get(&self, path: &str) -> Result<Option<ConfigEntry>> {
        let conn = self.conn.lock().await;
        self.provision(&conn)?;
        Self::fetch(&conn, &self.collection, &encode_identifier(path))
    }

    async fn delete(&self, path: &str) -> Result<DeleteResult> {
        let conn = self.conn.lock().await;
        self.provision(&conn)?;

        let deleted = conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", self.collection),
            params![encode_identifier(path)],
        )?;

        Ok(if deleted > 0 {
            DeleteResult::Deleted
        } else {
            DeleteResult::NotFound
        })
    }

    async fn list(&self, query: &ListQuery) -> Result<ListPage> {
        let column = match query.sort_field.as_str() {
            entry::PATH => "path",
            entry::TIMESTAMP | "timestamp" => "timestamp",
            other => {
                return Err(Error::InvalidRequest(format!(
                    "No mapping found for [{}] in order to sort on",
                    other
                )))
            }
        };
        query.validate()?;
        let order = match query.sort_order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };

        let conn = self.conn.lock().await;
        self.provision(&conn)?;

        let mut stmt = conn.prepare(&format!(
            "SELECT path, content, timestamp FROM {} ORDER BY {} {}, id ASC LIMIT ?1 OFFSET ?2",
            self.collection, column, order
        ))?;
        // Both fit: the window was checked above
        let limit = i64::try_from(query.size).unwrap_or(0);
        let offset = i64::try_from(query.from).unwrap_or(0);
        let rows = stmt.query_map(params![limit, offset], row_to_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }

        if query.fields.is_empty() {
            Ok(ListPage::Paths(entries.into_iter().map(|e| e.path).collect()))
        } else {
            Ok(ListPage::Documents(
                entries.iter().map(|e| project(e, &query.fields)).collect(),
            ))
        }
    }

    async fn last_sequence(&self) -> Result<Sequence> {
        let conn = self.conn.lock().await;
        self.provision(&conn)?;

        let value = conn
            .query_row(
                &format!("SELECT value FROM {}_sequence WHERE id = 1", self.collection),
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or(0))
    }

    async fn search_changed_since(
        &self,
        since: Sequence,
        page_size: usize,
        keep_alive: Duration,
    ) -> Result<ScrollPage> {
        let pending = {
            let conn = self.conn.lock().await;
            self.provision(&conn)?;

            let mut stmt = conn.prepare(&format!(
                "SELECT id FROM {} WHERE seq >= ?1 ORDER BY seq ASC",
                self.collection
            ))?;
            let rows = stmt.query_map(params![since], |row| row.get::<_, String>(0))?;

            let mut pending = VecDeque::new();
            for row in rows {
                pending.push_back(row?);
            }
            pending
        };

        tracing::trace!("Scroll over {} entries changed since {}", pending.len(), since);

        let scroll_id = uuid::Uuid::new_v4().to_string();
        self.scrolls.lock().await.insert(
            scroll_id.clone(),
            ScrollContext {
                pending,
                page_size: page_size.max(1),
                expires_at: Instant::now() + keep_alive,
            },
        );

        self.next_page(&scroll_id, keep_alive).await
    }

    async fn scroll(&self, scroll_id: &str, keep_alive: Duration) -> Result<ScrollPage> {
        self.next_page(scroll_id, keep_alive).await
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<()> {
        self.scrolls.lock().await.remove(scroll_id);
        Ok(())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        self.provision(&conn)?;

        let value = conn
            .query_row(
                &format!("SELECT value FROM {}_settings WHERE key = ?1", self.collection),
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    async fn put_setting(&self, key: &str, value: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().await;
        self.provision(&conn)?;

        match value {
            Some(value) => {
                conn.execute(
                    &format!(
                        r#"
                        INSERT INTO {}_settings (key, value) VALUES (?1, ?2)
                        ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = CURRENT_TIMESTAMP
                        "#,
                        self.collection
                    ),
                    params![key, value],
                )?;
            }
            None => {
                conn.execute(
                    &format!("DELETE FROM {}_settings WHERE key = ?1", self.collection),
                    params![key],
                )?;
            }
        }
        Ok(())
    }
}
