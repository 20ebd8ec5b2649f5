//! Cluster transport
//!
//! Delivers broadcast actions: in-process for this node, over the network
//! for peers.

use std::sync::Arc;

use super::broadcast::{BroadcastAction, NodeActions, NodeTransport};
use super::membership::NodeState;
use crate::error::{Error, Result};
use crate::network::{Message, NetworkClient};

pub struct ClusterTransport {
    node_id: String,
    local: Arc<dyn NodeActions>,
    client: Arc<NetworkClient>,
}

impl ClusterTransport {
    pub fn new(node_id: String, local: Arc<dyn NodeActions>, client: Arc<NetworkClient>) -> Self {
        Self {
            node_id,
            local,
            client,
        }
    }

    async fn execute_local(&self, action: BroadcastAction) -> Result<()> {
        match action {
            BroadcastAction::Flush => self.local.flush_local().await.map(|_| ()),
            BroadcastAction::ResetSync => self.local.reset_local().await,
        }
    }

    async fn execute_remote(&self, node: &NodeState, action: BroadcastAction) -> Result<()> {
        let request = match action {
            BroadcastAction::Flush => Message::FlushRequest {
                origin: self.node_id.clone(),
            },
            BroadcastAction::ResetSync => Message::ResetSyncRequest {
                origin: self.node_id.clone(),
            },
        };

        match (action, self.client.send(&node.address, request).await?) {
            (BroadcastAction::Flush, Message::FlushResponse { report, .. }) => {
                tracing::debug!(
                    "Node {} flushed: {} written, {} failed",
                    node.id,
                    report.written,
                    report.failed
                );
                Ok(())
            }
            (BroadcastAction::ResetSync, Message::ResetSyncResponse { .. }) => Ok(()),
            (_, Message::Error { message, .. }) => Err(Error::Remote {
                node: node.id.clone(),
                message,
            }),
            (_, other) => Err(Error::Network(format!(
                "unexpected {} from {}",
                other.type_name(),
                node.id
            ))),
        }
    }
}

#[async_trait::async_trait]
impl NodeTransport for ClusterTransport {
    async fn execute(&self, node: &NodeState, action: BroadcastAction) -> Result<()> {
        if node.id == self.node_id {
            self.execute_local(action).await
        } else {
            self.execute_remote(node, action).await
        }
    }
}
