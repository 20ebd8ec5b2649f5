//! Multi-node scenarios over real sockets
//!
//! Nodes share either one in-memory store or separate handles on one
//! database file. Each has its own configuration directory and serves the
//! node protocol on an ephemeral port.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use configsync::cluster::{ping_peers, NodeActions};
use configsync::config::{ConfigSyncConfig, PeerConfig, TimeValue};
use configsync::network::{NetworkServer, RequestHandler};
use configsync::service::ConfigSyncService;
use configsync::store::{DeleteResult, EntryStore, ListQuery, ListPage, SqliteStore};
use configsync::sync::SchedulerStatus;
use configsync::Error;
use tempfile::TempDir;
use tokio::task::JoinHandle;

struct TestNode {
    id: String,
    service: Arc<ConfigSyncService>,
    dir: TempDir,
    server: Option<(Arc<NetworkServer>, JoinHandle<configsync::Result<()>>)>,
}

impl TestNode {
    fn file(&self, path: &str) -> Option<Vec<u8>> {
        std::fs::read(self.dir.path().join(path)).ok()
    }

    async fn sync_pass(&self) -> configsync::sync::PassReport {
        self.service.sync().flush_local().await.unwrap()
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        if let Some((server, _)) = &self.server {
            server.stop();
        }
    }
}

fn node_config(id: &str, address: &str, dir: &Path, peers: Vec<PeerConfig>, interval: TimeValue) -> ConfigSyncConfig {
    let mut config = ConfigSyncConfig::from_toml(&format!(
        r#"
[node]
id = "{id}"
bind_address = "{address}"

[cluster]
connect_timeout_ms = 500
request_timeout_ms = 5000
"#
    ))
    .unwrap();
    config.sync.config_path = dir.to_path_buf();
    config.sync.flush_interval = interval;
    config.cluster.peers = peers;
    config
}

/// Start `n` nodes named node-1..node-n on one store. Nodes listed in `down`
/// get an address but nothing listens on it.
async fn spawn_cluster(
    n: usize,
    store: Arc<dyn EntryStore>,
    interval: TimeValue,
    down: &[usize],
) -> Vec<TestNode> {
    spawn_cluster_with(vec![store; n], interval, down).await
}

/// Start one node per store
async fn spawn_cluster_with(
    stores: Vec<Arc<dyn EntryStore>>,
    interval: TimeValue,
    down: &[usize],
) -> Vec<TestNode> {
    let n = stores.len();
    let mut servers = Vec::new();
    let mut addresses = Vec::new();
    for _ in 0..n {
        let server = NetworkServer::bind("127.0.0.1:0").await.unwrap();
        addresses.push(server.local_addr().unwrap().to_string());
        servers.push(server);
    }

    let mut nodes = Vec::new();
    for (i, (server, store)) in servers.into_iter().zip(stores).enumerate() {
        let id = format!("node-{}", i + 1);
        let peers = (0..n)
            .filter(|&j| j != i)
            .map(|j| PeerConfig {
                id: format!("node-{}", j + 1),
                address: addresses[j].clone(),
                data: true,
            })
            .collect();

        let dir = tempfile::tempdir().unwrap();
        let config = node_config(&id, &addresses[i], dir.path(), peers, interval);
        let service = Arc::new(ConfigSyncService::from_config(&config, store).await);

        let server = if down.contains(&(i + 1)) {
            // Free the port so connections are refused
            drop(server);
            None
        } else {
            let server = Arc::new(server);
            let handler = Arc::new(RequestHandler::new(
                id.clone(),
                Arc::clone(service.sync()) as Arc<dyn NodeActions>,
                Arc::clone(service.cluster()),
            ));
            let task = {
                let server = Arc::clone(&server);
                tokio::spawn(async move { server.serve(handler).await })
            };
            Some((server, task))
        };

        nodes.push(TestNode {
            id,
            service,
            dir,
            server,
        });
    }

    nodes
}

async fn wait_for_fresh_pass(
    rx: &mut tokio::sync::watch::Receiver<SchedulerStatus>,
    generation: u64,
) {
    tokio::time::timeout(
        Duration::from_secs(10),
        rx.wait_for(|s| s.generation == generation && s.passes >= 1),
    )
    .await
    .expect("no pass in the new generation")
    .unwrap();
}

fn shared_store() -> Arc<dyn EntryStore> {
    Arc::new(SqliteStore::open_in_memory("configsync").unwrap())
}

#[tokio::test]
async fn test_flush_materializes_on_every_node() {
    let store = shared_store();
    let nodes = spawn_cluster(3, Arc::clone(&store), TimeValue::from_millis(-1), &[]).await;

    nodes[0].service.store_file("a.txt", b"Test1").await.unwrap();
    let report = nodes[1].service.flush().await.unwrap();

    assert_eq!(report.nodes, vec!["node-1", "node-2", "node-3"]);
    for node in &nodes {
        assert_eq!(node.file("a.txt").as_deref(), Some(&b"Test1"[..]), "{}", node.id);
    }
}

#[tokio::test]
async fn test_second_flush_rewrites_nothing() {
    let store = shared_store();
    let nodes = spawn_cluster(2, Arc::clone(&store), TimeValue::from_millis(-1), &[]).await;

    nodes[0].service.store_file("conf/app.yml", b"k: v").await.unwrap();
    nodes[0].service.flush().await.unwrap();

    let target = nodes[1].dir.path().join("conf/app.yml");
    let before = std::fs::metadata(&target).unwrap().modified().unwrap();

    // A flush with no new writes leaves every file alone
    let report = nodes[1].sync_pass().await;
    assert_eq!(report.written, 0);
    nodes[0].service.flush().await.unwrap();

    let after = std::fs::metadata(&target).unwrap().modified().unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_delete_keeps_local_copies() {
    let store = shared_store();
    let nodes = spawn_cluster(2, Arc::clone(&store), TimeValue::from_millis(-1), &[]).await;

    nodes[0].service.store_file("a.txt", b"Test1").await.unwrap();
    nodes[0].service.flush().await.unwrap();

    assert_eq!(nodes[0].service.delete("a.txt").await.unwrap(), DeleteResult::Deleted);
    nodes[0].service.flush().await.unwrap();

    for node in &nodes {
        assert_eq!(node.file("a.txt").as_deref(), Some(&b"Test1"[..]));
    }
    assert!(nodes[1].service.get_content("a.txt").await.unwrap().is_none());
}

#[tokio::test]
async fn test_listing_sees_write_before_any_pass() {
    let store = shared_store();
    let nodes = spawn_cluster(2, Arc::clone(&store), TimeValue::from_millis(-1), &[]).await;

    nodes[0].service.store_file("a.txt", b"Test1").await.unwrap();

    let page = nodes[1].service.list_paths(&ListQuery::default()).await.unwrap();
    assert_eq!(page, ListPage::Paths(vec!["a.txt".to_string()]));
    assert!(nodes[1].file("a.txt").is_none());
}

#[tokio::test]
async fn test_broadcast_stops_at_failing_node() {
    let store = shared_store();
    let nodes = spawn_cluster(4, Arc::clone(&store), TimeValue::from_millis(-1), &[3]).await;

    nodes[0].service.store_file("a.txt", b"Test1").await.unwrap();
    let err = nodes[0].service.flush().await.unwrap_err();

    match err {
        Error::BroadcastFailed { node, action, .. } => {
            assert_eq!(node, "node-3");
            assert_eq!(action, "cluster:admin/configsync/flush");
        }
        other => panic!("unexpected error {:?}", other),
    }

    // Nodes before the failure ran their pass; the one after was never asked
    assert!(nodes[0].file("a.txt").is_some());
    assert!(nodes[1].file("a.txt").is_some());
    assert!(nodes[3].file("a.txt").is_none());
}

#[tokio::test]
async fn test_offline_node_is_skipped_after_heartbeat() {
    let store = shared_store();
    let nodes = spawn_cluster(3, Arc::clone(&store), TimeValue::from_millis(-1), &[2]).await;

    let leader = &nodes[0].service;
    ping_peers(leader.cluster(), leader.client(), Duration::from_millis(500)).await;

    nodes[0].service.store_file("a.txt", b"Test1").await.unwrap();
    let report = leader.flush().await.unwrap();

    assert_eq!(report.nodes, vec!["node-1", "node-3"]);
    assert!(nodes[2].file("a.txt").is_some());
}

#[tokio::test]
async fn test_reset_restarts_every_updater() {
    let store = shared_store();
    let nodes = spawn_cluster(3, Arc::clone(&store), TimeValue::from_millis(50), &[]).await;

    for node in &nodes {
        node.service.scheduler().start().await;
        assert_eq!(node.service.scheduler_status().generation, 1);
    }

    let mut receivers: Vec<_> = nodes.iter().map(|n| n.service.scheduler().subscribe()).collect();
    let report = nodes[2].service.reset_sync().await.unwrap();
    assert_eq!(report.nodes, vec!["node-1", "node-2", "node-3"]);

    nodes[0].service.store_file("after-reset.conf", b"fresh").await.unwrap();

    for (node, rx) in nodes.iter().zip(receivers.iter_mut()) {
        assert_eq!(node.service.scheduler_status().generation, 2);
        wait_for_fresh_pass(rx, 2).await;
    }

    // Each updater keeps scanning after the reset
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if nodes.iter().all(|n| n.file("after-reset.conf").is_some()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("updaters did not pick up the write");

    for node in &nodes {
        node.service.scheduler().stop().await;
    }
}

#[tokio::test]
async fn test_health_goes_green_once_peers_answer() {
    use configsync::cluster::HealthStatus;

    let store = shared_store();
    let nodes = spawn_cluster(3, Arc::clone(&store), TimeValue::from_millis(-1), &[]).await;
    let service = &nodes[0].service;

    assert_eq!(service.health_report().await.status, HealthStatus::Yellow);
    let err = service
        .wait_for_status(HealthStatus::Green, Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::WaitTimeout(_)));

    ping_peers(service.cluster(), service.client(), Duration::from_millis(500)).await;
    let report = service
        .wait_for_status(HealthStatus::Green, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(report.live_data_nodes, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_write_racing_a_pass_on_shared_file_is_not_lost() {
    let db_dir = tempfile::tempdir().unwrap();
    let db = db_dir.path().join("configsync.db");
    let stores: Vec<Arc<dyn EntryStore>> = (0..2)
        .map(|_| Arc::new(SqliteStore::open(&db, "configsync").unwrap()) as Arc<dyn EntryStore>)
        .collect();
    for store in &stores {
        store.ensure_collection().await.unwrap();
    }
    let nodes = spawn_cluster_with(stores, TimeValue::from_millis(-1), &[]).await;

    nodes[0].service.store_file("early.conf", b"early").await.unwrap();
    assert_eq!(nodes[1].sync_pass().await.written, 1);

    // A third process holds the file's write lock, so node-1's write waits
    let holder = rusqlite::Connection::open(&db).unwrap();
    holder.busy_timeout(Duration::from_secs(5)).unwrap();
    holder.execute_batch("BEGIN IMMEDIATE").unwrap();
    let late = {
        let service = Arc::clone(&nodes[0].service);
        tokio::spawn(async move { service.store_file("late.conf", b"late").await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    // node-2 scans while the write is still pending
    let report = nodes[1].sync_pass().await;
    assert_eq!(report.written, 0);
    tokio::time::sleep(Duration::from_millis(50)).await;

    holder.execute_batch("COMMIT").unwrap();
    late.await.unwrap().unwrap();

    let report = nodes[1].sync_pass().await;
    assert_eq!(report.written, 1);
    assert_eq!(nodes[1].file("late.conf").as_deref(), Some(&b"late"[..]));
    assert_eq!(nodes[1].file("early.conf").as_deref(), Some(&b"early"[..]));
}
