//! ConfigSync Service
//!
//! The operations a node exposes to clients: file CRUD against the shared
//! store, the two cluster-wide actions, health waits and dynamic settings.

use std::sync::Arc;
use std::time::Duration;

use crate::cluster::{
    BroadcastAction, BroadcastCoordinator, BroadcastReport, ClusterMembership, ClusterTransport,
    HealthMonitor, HealthReport, HealthStatus, NodeActions, NodeTransport,
};
use crate::config::{ConfigSyncConfig, TimeValue};
use crate::error::Result;
use crate::network::NetworkClient;
use crate::settings::ClusterSettings;
use crate::store::{validate_path, ConfigEntry, DeleteResult, EntryStore, ListPage, ListQuery};
use crate::sync::{LocalSync, SchedulerStatus, SyncNode, UpdaterScheduler};

/// One node's service
pub struct ConfigSyncService {
    node_id: String,
    store: Arc<dyn EntryStore>,
    settings: Arc<ClusterSettings>,
    sync: Arc<SyncNode>,
    cluster: Arc<ClusterMembership>,
    health: Arc<HealthMonitor>,
    client: Arc<NetworkClient>,
    broadcast: BroadcastCoordinator,
}

impl ConfigSyncService {
    /// Wire a node from its configuration and a store handle
    pub async fn from_config(config: &ConfigSyncConfig, store: Arc<dyn EntryStore>) -> Self {
        let cluster = Arc::new(ClusterMembership::from_config(config).await);
        let settings = Arc::new(ClusterSettings::new(
            Arc::clone(&store),
            config.sync.flush_interval,
        ));

        let local = Arc::new(LocalSync::new(Arc::clone(&store), &config.sync));
        let scheduler = Arc::new(UpdaterScheduler::new(
            local.clone(),
            Arc::clone(&settings),
            config.sync.file_updater_enabled,
        ));
        let sync = Arc::new(SyncNode::new(local, scheduler));

        let client = Arc::new(NetworkClient::new(
            config.connect_timeout(),
            config.request_timeout(),
        ));
        let transport = Arc::new(ClusterTransport::new(
            config.node.id.clone(),
            Arc::clone(&sync) as Arc<dyn NodeActions>,
            Arc::clone(&client),
        ));

        Self::new(config.node.id.clone(), store, settings, sync, cluster, client, transport)
    }

    /// Wire a node from already-built parts
    pub fn new(
        node_id: String,
        store: Arc<dyn EntryStore>,
        settings: Arc<ClusterSettings>,
        sync: Arc<SyncNode>,
        cluster: Arc<ClusterMembership>,
        client: Arc<NetworkClient>,
        transport: Arc<dyn NodeTransport>,
    ) -> Self {
        let health = Arc::new(HealthMonitor::new(Arc::clone(&cluster), Arc::clone(&store)));
        let broadcast = BroadcastCoordinator::new(Arc::clone(&cluster), transport);

        Self {
            node_id,
            store,
            settings,
            sync,
            cluster,
            health,
            client,
            broadcast,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn store(&self) -> &Arc<dyn EntryStore> {
        &self.store
    }

    pub fn sync(&self) -> &Arc<SyncNode> {
        &self.sync
    }

    pub fn scheduler(&self) -> &Arc<UpdaterScheduler> {
        self.sync.scheduler()
    }

    pub fn cluster(&self) -> &Arc<ClusterMembership> {
        &self.cluster
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn client(&self) -> &Arc<NetworkClient> {
        &self.client
    }

    /// Store a file; a later store of the same path replaces it
    pub async fn store_file(&self, path: &str, content: &[u8]) -> Result<ConfigEntry> {
        validate_path(path)?;
        let entry = self.store.put(path, content).await?;
        tracing::info!("Stored {} ({} bytes)", path, content.len());
        Ok(entry)
    }

    /// Raw content of a stored file
    pub async fn get_content(&self, path: &str) -> Result<Option<Vec<u8>>> {
        validate_path(path)?;
        match self.store.get(path).await? {
            Some(entry) => Ok(Some(entry.decode_content()?)),
            None => Ok(None),
        }
    }

    /// List stored files
    pub async fn list_paths(&self, query: &ListQuery) -> Result<ListPage> {
        self.store.list(query).await
    }

    /// Remove a file from the store. Local copies on nodes are left in place.
    pub async fn delete(&self, path: &str) -> Result<DeleteResult> {
        validate_path(path)?;
        let result = self.store.delete(path).await?;
        tracing::info!("Delete {}: {}", path, result.as_str());
        Ok(result)
    }

    /// Run a scan pass on every data node now
    pub async fn flush(&self) -> Result<BroadcastReport> {
        self.store.ensure_collection().await?;
        self.broadcast.broadcast(BroadcastAction::Flush).await
    }

    /// Restart the file updater on every data node
    pub async fn reset_sync(&self) -> Result<BroadcastReport> {
        self.store.ensure_collection().await?;
        self.broadcast.broadcast(BroadcastAction::ResetSync).await
    }

    /// Wait until cluster health is at least `status`
    pub async fn wait_for_status(
        &self,
        status: HealthStatus,
        timeout: Duration,
    ) -> Result<HealthReport> {
        self.health.wait_for(status, timeout).await
    }

    /// Current health
    pub async fn health_report(&self) -> HealthReport {
        self.health.report().await
    }

    /// File updater status on this node
    pub fn scheduler_status(&self) -> SchedulerStatus {
        self.sync.scheduler().status()
    }

    /// Effective scan interval
    pub async fn flush_interval(&self) -> TimeValue {
        self.settings.flush_interval().await
    }

    /// Interval used when no cluster-wide override exists
    pub fn default_flush_interval(&self) -> TimeValue {
        self.settings.default_flush_interval()
    }

    /// Set or clear the cluster-wide scan interval
    pub async fn set_flush_interval(&self, value: Option<TimeValue>) -> Result<()> {
        self.settings.set_flush_interval(value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::SqliteStore;
    use tempfile::tempdir;

    fn config(dir: &std::path::Path) -> ConfigSyncConfig {
        let mut config = ConfigSyncConfig::from_toml(
            r#"
[node]
id = "node-1"
bind_address = "127.0.0.1:0"
"#,
        )
        .unwrap();
        config.sync.config_path = dir.to_path_buf();
        config
    }

    async fn service(dir: &std::path::Path) -> ConfigSyncService {
        let store: Arc<dyn EntryStore> = Arc::new(SqliteStore::open_in_memory("configsync").unwrap());
        ConfigSyncService::from_config(&config(dir), store).await
    }

    #[tokio::test]
    async fn test_store_get_delete() {
        let dir = tempdir().unwrap();
        let service = service(dir.path()).await;

        service.store_file("a.txt", b"Test1").await.unwrap();
        assert_eq!(service.get_content("a.txt").await.unwrap().unwrap(), b"Test1");

        service.store_file("a.txt", b"Test2").await.unwrap();
        assert_eq!(service.get_content("a.txt").await.unwrap().unwrap(), b"Test2");

        assert_eq!(service.delete("a.txt").await.unwrap(), DeleteResult::Deleted);
        assert_eq!(service.delete("a.txt").await.unwrap(), DeleteResult::NotFound);
        assert!(service.get_content("a.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_path_rejected() {
        let dir = tempdir().unwrap();
        let service = service(dir.path()).await;

        assert!(matches!(
            service.store_file("", b"x").await,
            Err(Error::InvalidRequest(_))
        ));
        assert!(matches!(service.delete("").await, Err(Error::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_single_node_flush_writes_locally() {
        let dir = tempdir().unwrap();
        let service = service(dir.path()).await;

        service.store_file("conf/app.yml", b"k: v").await.unwrap();
        let report = service.flush().await.unwrap();

        assert_eq!(report.nodes, vec!["node-1"]);
        assert_eq!(std::fs::read(dir.path().join("conf/app.yml")).unwrap(), b"k: v");
    }

    #[tokio::test]
    async fn test_delete_keeps_local_file() {
        let dir = tempdir().unwrap();
        let service = service(dir.path()).await;

        service.store_file("a.txt", b"Test1").await.unwrap();
        service.flush().await.unwrap();
        service.delete("a.txt").await.unwrap();
        service.flush().await.unwrap();

        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"Test1");
    }

    #[tokio::test]
    async fn test_flush_interval_setting() {
        let dir = tempdir().unwrap();
        let service = service(dir.path()).await;

        assert_eq!(service.flush_interval().await, TimeValue::from_mins(1));
        service.set_flush_interval(Some(TimeValue::from_secs(10))).await.unwrap();
        assert_eq!(service.flush_interval().await, TimeValue::from_secs(10));
        assert_eq!(service.default_flush_interval(), TimeValue::from_mins(1));
    }
}
