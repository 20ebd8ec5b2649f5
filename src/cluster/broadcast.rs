//! Broadcast Coordinator
//!
//! Delivers a cluster action to every eligible data node, one at a time in
//! node-id order, and stops at the first node that fails.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::membership::{ClusterMembership, NodeState};
use crate::error::{Error, Result};
use crate::sync::PassReport;

/// Actions that can be broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastAction {
    /// Run one scan pass now
    Flush,
    /// Restart the file updater
    ResetSync,
}

impl BroadcastAction {
    /// Registered action name
    pub fn name(&self) -> &'static str {
        match self {
            BroadcastAction::Flush => "cluster:admin/configsync/flush",
            BroadcastAction::ResetSync => "cluster:admin/configsync/reset_sync",
        }
    }
}

impl std::fmt::Display for BroadcastAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What a node does when an action reaches it
#[async_trait::async_trait]
pub trait NodeActions: Send + Sync {
    /// Run one change-scan pass now and report on it
    async fn flush_local(&self) -> Result<PassReport>;

    /// Cancel the running updater generation and start a fresh one
    async fn reset_local(&self) -> Result<()>;
}

/// Delivers an action to one node and waits for its acknowledgment
#[async_trait::async_trait]
pub trait NodeTransport: Send + Sync {
    async fn execute(&self, node: &NodeState, action: BroadcastAction) -> Result<()>;
}

/// Result of a broadcast where every node acknowledged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastReport {
    pub action: BroadcastAction,
    /// Nodes that acknowledged, in delivery order
    pub nodes: Vec<String>,
}

/// Runs fail-fast broadcasts over the eligible data nodes
pub struct BroadcastCoordinator {
    cluster: Arc<ClusterMembership>,
    transport: Arc<dyn NodeTransport>,
}

impl BroadcastCoordinator {
    pub fn new(cluster: Arc<ClusterMembership>, transport: Arc<dyn NodeTransport>) -> Self {
        Self { cluster, transport }
    }

    /// Deliver `action` to each eligible data node in turn.
    ///
    /// The first failure ends the broadcast; nodes after it are not
    /// contacted and nodes before it are not rolled back. With no eligible
    /// nodes the broadcast trivially succeeds.
    pub async fn broadcast(&self, action: BroadcastAction) -> Result<BroadcastReport> {
        let nodes = self.cluster.eligible_data_nodes().await;
        tracing::debug!("Broadcasting {} to {} nodes", action, nodes.len());

        let mut acknowledged = Vec::with_capacity(nodes.len());
        for node in &nodes {
            if let Err(e) = self.transport.execute(node, action).await {
                tracing::warn!("{} failed on node {}: {}", action, node.id, e);
                return Err(Error::BroadcastFailed {
                    action: action.name().to_string(),
                    node: node.id.clone(),
                    reason: e.to_string(),
                });
            }
            tracing::trace!("{} acknowledged by {}", action, node.id);
            acknowledged.push(node.id.clone());
        }

        Ok(BroadcastReport {
            action,
            nodes: acknowledged,
        })
    }
}
