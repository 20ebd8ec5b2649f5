//! Cluster Module
//!
//! Membership, health, heartbeats and the fail-fast broadcast of cluster
//! actions.

mod broadcast;
mod health;
mod heartbeat;
mod membership;
mod transport;

pub use broadcast::{BroadcastAction, BroadcastCoordinator, BroadcastReport, NodeActions, NodeTransport};
pub use health::{HealthMonitor, HealthReport, HealthStatus};
pub use heartbeat::{ping_peers, run_heartbeat};
pub use membership::{ClusterMembership, ClusterSummary, NodeState, NodeStatus};
pub use transport::ClusterTransport;
