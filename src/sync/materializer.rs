//! File Materializer
//!
//! Writes store entries to the local filesystem when the local copy is
//! older than the entry.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};
use crate::store::{ConfigEntry, Timestamp};

/// What happened to one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Materialized {
    /// The file was (re)written
    Written(PathBuf),
    /// The local file was already up to date
    Skipped(PathBuf),
}

/// Writes entries under a base directory
#[derive(Debug, Clone)]
pub struct FileMaterializer {
    base_dir: PathBuf,
}

impl FileMaterializer {
    /// Create a materializer rooted at `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Base directory files are written under
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Map a logical path to a location under the base directory.
    ///
    /// `..`, `.` and empty segments are dropped, so the result can never
    /// leave the base directory.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let mut resolved = self.base_dir.clone();
        let mut segments = 0;

        for segment in path.split(['/', '\\']) {
            match segment {
                "" | "." | ".." => continue,
                name => {
                    resolved.push(name);
                    segments += 1;
                }
            }
        }

        if segments == 0 {
            return Err(Error::Materialize {
                path: path.to_string(),
                reason: "path does not name a file".into(),
            });
        }

        Ok(resolved)
    }

    /// Whether the file at `target` must be rewritten for an entry written
    /// at `timestamp`: it is missing, or strictly older.
    pub async fn is_stale(target: &Path, timestamp: Timestamp) -> Result<bool> {
        match tokio::fs::metadata(target).await {
            Ok(metadata) => {
                let modified = to_millis(metadata.modified()?);
                tracing::debug!(
                    "timestamp(store): {}, timestamp(file): {} for {}",
                    timestamp,
                    modified,
                    target.display()
                );
                Ok(modified < timestamp)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    /// Bring the local file of `entry` up to date
    pub async fn materialize(&self, entry: &ConfigEntry) -> Result<Materialized> {
        let target = self.resolve(&entry.path)?;
        tracing::debug!("Checking {}", target.display());

        if !Self::is_stale(&target, entry.timestamp).await? {
            return Ok(Materialized::Skipped(target));
        }

        if let Some(parent) = target.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                tracing::warn!("Failed to create {}: {}", parent.display(), e);
            }
        }

        let content = entry.decode_content()?;
        let timestamp = entry.timestamp;
        let destination = target.clone();
        tokio::task::spawn_blocking(move || write_file(&destination, &content, timestamp))
            .await
            .map_err(|e| Error::Internal(format!("write task failed: {}", e)))??;

        tracing::info!("Updated {}", target.display());
        Ok(Materialized::Written(target))
    }
}

/// Write through a sibling temp file so readers never see a partial file.
/// The file's mtime is set to the entry's timestamp, making the next
/// staleness check exact.
fn write_file(target: &Path, content: &[u8], timestamp: Timestamp) -> std::io::Result<()> {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = target.with_file_name(format!(".{}.configsync-tmp", file_name));

    let result = (|| {
        let mut file = std::fs::File::create(&temp)?;
        file.write_all(content)?;
        file.sync_all()?;
        file.set_modified(from_millis(timestamp))?;
        drop(file);
        std::fs::rename(&temp, target)
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&temp);
    }
    result
}

fn to_millis(time: SystemTime) -> Timestamp {
    chrono::DateTime::<chrono::Utc>::from(time).timestamp_millis()
}

fn from_millis(timestamp: Timestamp) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(u64::try_from(timestamp).unwrap_or(0))
}
