//! Cluster health
//!
//! `red` when the shared store cannot be reached, `yellow` when it can but
//! some data node is not answering, `green` when every data node is live.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::membership::{ClusterMembership, NodeStatus};
use crate::error::{Error, Result};
use crate::store::EntryStore;

/// How often `wait_for` re-evaluates health
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Health level, ordered from worst to best
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Red,
    Yellow,
    Green,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Red => "red",
            HealthStatus::Yellow => "yellow",
            HealthStatus::Green => "green",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HealthStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "red" => Ok(HealthStatus::Red),
            "yellow" => Ok(HealthStatus::Yellow),
            "green" => Ok(HealthStatus::Green),
            other => Err(Error::InvalidRequest(format!("unknown health status: {}", other))),
        }
    }
}

/// Point-in-time health
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub store_available: bool,
    pub data_nodes: usize,
    pub live_data_nodes: usize,
}

/// Computes cluster health from the store and the membership
pub struct HealthMonitor {
    cluster: Arc<ClusterMembership>,
    store: Arc<dyn EntryStore>,
}

impl HealthMonitor {
    pub fn new(cluster: Arc<ClusterMembership>, store: Arc<dyn EntryStore>) -> Self {
        Self { cluster, store }
    }

    /// Current health
    pub async fn report(&self) -> HealthReport {
        let store_available = match self.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Store is unavailable: {}", e);
                false
            }
        };

        let nodes = self.cluster.all_nodes().await;
        let data_nodes = nodes.iter().filter(|n| n.data).count();
        let live_data_nodes = nodes
            .iter()
            .filter(|n| n.data && n.status == NodeStatus::Active)
            .count();

        let status = if !store_available {
            HealthStatus::Red
        } else if live_data_nodes < data_nodes {
            HealthStatus::Yellow
        } else {
            HealthStatus::Green
        };

        HealthReport {
            status,
            store_available,
            data_nodes,
            live_data_nodes,
        }
    }

    /// Wait until health is at least `status`.
    ///
    /// Fails with `WaitTimeout` carrying the last observed level if it is
    /// not reached within `timeout`.
    pub async fn wait_for(&self, status: HealthStatus, timeout: Duration) -> Result<HealthReport> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let report = self.report().await;
            if report.status >= status {
                return Ok(report);
            }

            if tokio::time::Instant::now() + POLL_INTERVAL > deadline {
                return Err(Error::WaitTimeout(report.status.to_string()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
