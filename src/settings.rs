//! Cluster-wide dynamic settings
//!
//! Settings that can change while nodes run are kept in the shared store and
//! read on demand, so every node sees an update on its next read.

use std::sync::Arc;

use crate::config::TimeValue;
use crate::error::Result;
use crate::store::EntryStore;

/// Setting key of the scan interval
pub const FLUSH_INTERVAL: &str = "configsync.flush_interval";

/// Accessor for cluster-wide settings with static fallbacks
pub struct ClusterSettings {
    store: Arc<dyn EntryStore>,
    default_flush_interval: TimeValue,
}

impl ClusterSettings {
    /// Create an accessor falling back to the node's configured interval
    pub fn new(store: Arc<dyn EntryStore>, default_flush_interval: TimeValue) -> Self {
        Self {
            store,
            default_flush_interval,
        }
    }

    /// The statically configured interval
    pub fn default_flush_interval(&self) -> TimeValue {
        self.default_flush_interval
    }

    /// Current scan interval. Never fails: an unreadable or malformed value
    /// falls back to the static default.
    pub async fn flush_interval(&self) -> TimeValue {
        match self.store.get_setting(FLUSH_INTERVAL).await {
            Ok(Some(raw)) => match TimeValue::parse(&raw) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!("Ignoring malformed {} '{}': {}", FLUSH_INTERVAL, raw, e);
                    self.default_flush_interval
                }
            },
            Ok(None) => self.default_flush_interval,
            Err(e) => {
                tracing::warn!("Could not read {}: {}", FLUSH_INTERVAL, e);
                self.default_flush_interval
            }
        }
    }

    /// Override the interval cluster-wide, or with `None` go back to each
    /// node's default
    pub async fn set_flush_interval(&self, value: Option<TimeValue>) -> Result<()> {
        let raw = value.map(|v| v.to_string());
        self.store.put_setting(FLUSH_INTERVAL, raw.as_deref()).await?;
        tracing::info!(
            "Set {} to {}",
            FLUSH_INTERVAL,
            raw.as_deref().unwrap_or("(default)")
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    #[tokio::test]
    async fn test_dynamic_interval_overrides_default() {
        let store: Arc<dyn EntryStore> = Arc::new(SqliteStore::open_in_memory("configsync").unwrap());
        let settings = ClusterSettings::new(Arc::clone(&store), TimeValue::from_mins(1));

        assert_eq!(settings.flush_interval().await, TimeValue::from_mins(1));

        settings.set_flush_interval(Some(TimeValue::from_secs(5))).await.unwrap();
        assert_eq!(settings.flush_interval().await, TimeValue::from_secs(5));

        settings.set_flush_interval(Some(TimeValue::from_millis(-1))).await.unwrap();
        assert!(settings.flush_interval().await.is_disabled());

        settings.set_flush_interval(None).await.unwrap();
        assert_eq!(settings.flush_interval().await, TimeValue::from_mins(1));
    }

    #[tokio::test]
    async fn test_malformed_value_falls_back() {
        let store: Arc<dyn EntryStore> = Arc::new(SqliteStore::open_in_memory("configsync").unwrap());
        store.put_setting(FLUSH_INTERVAL, Some("soon")).await.unwrap();

        let settings = ClusterSettings::new(store, TimeValue::from_secs(15));
        assert_eq!(settings.flush_interval().await, TimeValue::from_secs(15));
    }
}
