//! Cluster Membership
//!
//! Tracks which nodes make up the cluster, which of them hold a data role
//! and whether they have been heard from recently.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::config::ConfigSyncConfig;

/// Liveness of a node as seen from here
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Configured but not heard from yet
    Joining,
    /// Answering heartbeats
    Active,
    /// Missed heartbeats or refused a connection
    Offline,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NodeStatus::Joining => "joining",
            NodeStatus::Active => "active",
            NodeStatus::Offline => "offline",
        };
        f.write_str(name)
    }
}

/// One member of the cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeState {
    pub id: String,
    /// Node transport address (host:port)
    pub address: String,
    /// Whether the node keeps a local copy of the configuration files
    pub data: bool,
    pub status: NodeStatus,
    /// Local clock reading of the last pong or ping
    #[serde(skip)]
    pub last_heartbeat: Option<Instant>,
    /// When the node was added
    pub joined_at: chrono::DateTime<chrono::Utc>,
}

impl NodeState {
    /// A configured node nobody has heard from yet
    pub fn new(id: String, address: String, data: bool) -> Self {
        Self {
            id,
            address,
            data,
            status: NodeStatus::Joining,
            last_heartbeat: None,
            joined_at: chrono::Utc::now(),
        }
    }

    /// Heard from within `timeout`
    pub fn is_healthy(&self, timeout: Duration) -> bool {
        self.last_heartbeat
            .map_or(false, |seen| seen.elapsed() < timeout)
    }

    pub fn touch(&mut self) {
        self.last_heartbeat = Some(Instant::now());
    }

    /// Whether broadcasts should address this node
    pub fn is_eligible(&self) -> bool {
        self.data && self.status != NodeStatus::Offline
    }
}

/// The set of nodes this node knows about, itself included
pub struct ClusterMembership {
    node_id: String,
    nodes: RwLock<HashMap<String, NodeState>>,
    /// Silence after which an active peer goes offline
    heartbeat_timeout: Duration,
}

impl ClusterMembership {
    /// Create a tracker holding only this node
    pub fn new(node_id: String, address: String, data: bool, heartbeat_timeout: Duration) -> Self {
        let mut local = NodeState::new(node_id.clone(), address, data);
        local.status = NodeStatus::Active;
        local.touch();

        Self {
            nodes: RwLock::new(HashMap::from([(node_id.clone(), local)])),
            node_id,
            heartbeat_timeout,
        }
    }

    /// Build the membership from a node configuration and its static peers.
    /// A node counts as gone after missing three heartbeats.
    pub async fn from_config(config: &ConfigSyncConfig) -> Self {
        let membership = Self::new(
            config.node.id.clone(),
            config.advertise_address().to_string(),
            config.node.data,
            config.heartbeat_interval() * 3,
        );
        for peer in &config.cluster.peers {
            membership
                .add_peer(peer.id.clone(), peer.address.clone(), peer.data)
                .await;
        }
        membership
    }

    /// Id of the local node
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Add a peer node, keeping its state if it is already known
    pub async fn add_peer(&self, id: String, address: String, data: bool) {
        let mut nodes = self.nodes.write().await;
        nodes
            .entry(id.clone())
            .or_insert_with(|| NodeState::new(id, address, data));
    }

    pub async fn get_node(&self, id: &str) -> Option<NodeState> {
        self.nodes.read().await.get(id).cloned()
    }

    /// Note that `id` answered or pinged us
    pub async fn record_heartbeat(&self, id: &str) {
        let mut nodes = self.nodes.write().await;
        match nodes.get_mut(id) {
            Some(node) => {
                node.touch();
                if node.status != NodeStatus::Active {
                    tracing::info!("Node {} is {} (was {})", id, NodeStatus::Active, node.status);
                    node.status = NodeStatus::Active;
                }
            }
            None => tracing::debug!("Heartbeat from unknown node {}", id),
        }
    }

    /// Mark a peer as unreachable
    pub async fn mark_offline(&self, id: &str) {
        if id == self.node_id {
            return;
        }
        let mut nodes = self.nodes.write().await;
        if let Some(node) = nodes.get_mut(id) {
            if node.status != NodeStatus::Offline {
                tracing::warn!("Node {} is {}", id, NodeStatus::Offline);
                node.status = NodeStatus::Offline;
            }
        }
    }

    /// Mark peers whose heartbeats stopped as offline, returning their ids.
    /// Peers never heard from are left alone.
    pub async fn check_timeouts(&self) -> Vec<String> {
        let mut nodes = self.nodes.write().await;
        let mut silent = Vec::new();

        for node in nodes.values_mut() {
            let expired = node.id != self.node_id
                && node.status == NodeStatus::Active
                && node.last_heartbeat.is_some()
                && !node.is_healthy(self.heartbeat_timeout);
            if expired {
                tracing::warn!("Node {} missed heartbeats", node.id);
                node.status = NodeStatus::Offline;
                silent.push(node.id.clone());
            }
        }

        silent.sort();
        silent
    }

    /// All peer nodes (excluding self), sorted by id
    pub async fn peers(&self) -> Vec<NodeState> {
        let mut peers = self.all_nodes().await;
        peers.retain(|n| n.id != self.node_id);
        peers
    }

    /// All nodes (including self), sorted by id
    pub async fn all_nodes(&self) -> Vec<NodeState> {
        let mut all: Vec<_> = self.nodes.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Data-role nodes a broadcast addresses, in a stable order
    pub async fn eligible_data_nodes(&self) -> Vec<NodeState> {
        let mut eligible = self.all_nodes().await;
        eligible.retain(NodeState::is_eligible);
        eligible
    }

    /// Counts by role and status
    pub async fn summary(&self) -> ClusterSummary {
        self.nodes
            .read()
            .await
            .values()
            .fold(ClusterSummary::default(), |mut counts, node| {
                counts.total_nodes += 1;
                counts.data_nodes += usize::from(node.data);
                match node.status {
                    NodeStatus::Active => counts.active_nodes += 1,
                    NodeStatus::Joining => counts.joining_nodes += 1,
                    NodeStatus::Offline => counts.offline_nodes += 1,
                }
                counts
            })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub total_nodes: usize,
    pub data_nodes: usize,
    pub active_nodes: usize,
    pub joining_nodes: usize,
    pub offline_nodes: usize,
}
