//! Heartbeat loop
//!
//! Pings every peer on an interval to keep the membership's view of who is
//! live current.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::membership::ClusterMembership;
use crate::network::{Message, NetworkClient};

/// Ping each peer once and update its status
pub async fn ping_peers(cluster: &ClusterMembership, client: &NetworkClient, timeout: Duration) {
    let ping = Message::Ping {
        node_id: cluster.node_id().to_string(),
    };

    for peer in cluster.peers().await {
        match client.send_with_timeout(&peer.address, ping.clone(), timeout).await {
            Ok(Message::Pong { .. }) => cluster.record_heartbeat(&peer.id).await,
            Ok(other) => {
                tracing::debug!("Unexpected {} from {}", other.type_name(), peer.id);
                cluster.mark_offline(&peer.id).await;
            }
            Err(e) => {
                tracing::trace!("Ping to {} failed: {}", peer.id, e);
                cluster.mark_offline(&peer.id).await;
            }
        }
    }

    cluster.check_timeouts().await;
}

/// Ping peers every `interval` until `shutdown` fires
pub async fn run_heartbeat(
    cluster: Arc<ClusterMembership>,
    client: Arc<NetworkClient>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => ping_peers(&cluster, &client, interval).await,
        }
    }

    tracing::debug!("Heartbeat loop stopped");
}
