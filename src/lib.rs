//! ConfigSync - Cluster-wide configuration file synchronization
//!
//! Keeps a directory of configuration files identical on every data node of
//! a cluster. Files are written once to a shared entry store; every node
//! periodically scans the store for entries changed since its last scan and
//! rewrites local files that are older than the stored copy.
//!
//! # Architecture
//!
//! The shared store is the single source of truth. Each node runs a file
//! updater that pages through recently changed entries and materializes them
//! under its configuration directory. Two cluster-wide actions are delivered
//! node by node over a framed TCP protocol: `flush` runs one scan pass
//! everywhere now, `reset` restarts every node's file updater.
//!
//! # Features
//!
//! - Embedded SQLite entry store with paginated listings and scroll scans
//! - Incremental change scans with a per-node cursor
//! - Timestamp-based staleness so a second pass rewrites nothing
//! - Fail-fast, ordered broadcast of cluster actions
//! - Dynamic scan interval shared through the store
//! - HTTP API and operator CLI

pub mod api;
pub mod cluster;
pub mod config;
pub mod error;
pub mod network;
pub mod service;
pub mod settings;
pub mod store;
pub mod sync;

pub use config::ConfigSyncConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cluster::{BroadcastAction, ClusterMembership, HealthStatus, NodeState};
    pub use crate::config::{ConfigSyncConfig, TimeValue};
    pub use crate::error::{Error, Result};
    pub use crate::service::ConfigSyncService;
    pub use crate::store::{ConfigEntry, EntryStore, SqliteStore};
    pub use crate::sync::{PassOutcome, PassReport, SyncCursor};
}
