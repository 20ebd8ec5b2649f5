//! ConfigSync Configuration
//!
//! This module provides configuration structures for a ConfigSync node,
//! loaded from TOML.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::PathBuf;
use std::time::Duration;

/// Main ConfigSync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSyncConfig {
    /// `[node]` section
    pub node: NodeConfig,

    /// Entry store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// File synchronization configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// `[cluster]` section
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// `[api]` section
    #[serde(default)]
    pub api: ApiConfig,

    /// `[logging]` section
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[node]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier
    pub id: String,

    /// Address to bind for node-to-node communication
    pub bind_address: String,

    /// Address peers should dial, when it differs from the bind address
    #[serde(default)]
    pub advertise_address: Option<String>,

    /// Whether this node holds configuration files (takes part in flush/reset)
    #[serde(default = "default_true")]
    pub data: bool,
}

/// Entry store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file, shared by every node of the cluster
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Name of the collection (table) holding the entries
    #[serde(default = "default_collection")]
    pub collection: String,
}

/// File synchronization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base directory the entries are materialized under
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,

    /// Number of entries fetched per page during a scan
    #[serde(default = "default_scroll_size")]
    pub scroll_size: usize,

    /// How long a scan's scroll context stays alive between pages
    #[serde(default = "default_scroll_time")]
    pub scroll_time: TimeValue,

    /// Run the periodic file updater on this node
    #[serde(default = "default_true")]
    pub file_updater_enabled: bool,

    /// Default interval between scans (negative disables scheduling)
    #[serde(default = "default_flush_interval")]
    pub flush_interval: TimeValue,

    /// Backoff before retrying a failed start-up sequence
    #[serde(default = "default_startup_retry")]
    pub startup_retry: TimeValue,

    /// How long start-up waits for a green cluster before proceeding anyway
    #[serde(default = "default_startup_wait")]
    pub startup_wait: TimeValue,
}

/// A statically configured cluster member
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerConfig {
    /// Node identifier
    pub id: String,

    /// Node-to-node address (host:port)
    pub address: String,

    /// Whether the peer holds configuration files
    #[serde(default = "default_true")]
    pub data: bool,
}

/// `[cluster]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Other members of the cluster
    #[serde(default)]
    pub peers: Vec<PeerConfig>,

    /// Milliseconds between peer pings
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Connect timeout for node-to-node requests in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Request timeout for node-to-node requests in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// `[api]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Serve the HTTP API at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Listen address of the HTTP API
    #[serde(default = "default_api_address")]
    pub bind_address: String,

    /// Answer cross-origin requests
    #[serde(default)]
    pub cors_enabled: bool,
}

/// `[logging]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; RUST_LOG wins when set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// A duration setting that may be negative, written as `<n><unit>`
/// (`ms`, `s`, `m`, `h`, `d`) or as a bare millisecond count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeValue {
    millis: i64,
}

impl TimeValue {
    /// Create from milliseconds
    pub const fn from_millis(millis: i64) -> Self {
        Self { millis }
    }

    /// Create from seconds
    pub const fn from_secs(secs: i64) -> Self {
        Self { millis: secs * 1000 }
    }

    /// Create from minutes
    pub const fn from_mins(mins: i64) -> Self {
        Self { millis: mins * 60_000 }
    }

    /// Raw milliseconds (negative means disabled)
    pub fn millis(&self) -> i64 {
        self.millis
    }

    /// Whether the value is negative
    pub fn is_disabled(&self) -> bool {
        self.millis < 0
    }

    /// The value as a `Duration`, or `None` when negative
    pub fn as_duration(&self) -> Option<Duration> {
        u64::try_from(self.millis).ok().map(Duration::from_millis)
    }

    /// Parse a time value such as `30s`, `1m`, `250ms` or `-1`
    pub fn parse(value: &str) -> crate::Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(crate::Error::InvalidRequest("empty time value".into()));
        }

        let split = value
            .find(|c: char| !(c.is_ascii_digit() || c == '-'))
            .unwrap_or(value.len());
        let (number, unit) = value.split_at(split);
        let number: i64 = number
            .parse()
            .map_err(|_| crate::Error::InvalidRequest(format!("invalid time value: {}", value)))?;

        let factor = match unit.trim() {
            "" | "ms" => 1,
            "s" => 1_000,
            "m" => 60_000,
            "h" => 3_600_000,
            "d" => 86_400_000,
            other => {
                return Err(crate::Error::InvalidRequest(format!(
                    "unknown time unit '{}' in {}",
                    other, value
                )))
            }
        };

        // Any negative value means "disabled", whatever the unit
        if number < 0 {
            return Ok(Self::from_millis(-1));
        }

        Ok(Self::from_millis(number.saturating_mul(factor)))
    }
}

impl std::fmt::Display for TimeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ms = self.millis;
        if ms < 0 {
            write!(f, "-1")
        } else if ms != 0 && ms % 86_400_000 == 0 {
            write!(f, "{}d", ms / 86_400_000)
        } else if ms != 0 && ms % 3_600_000 == 0 {
            write!(f, "{}h", ms / 3_600_000)
        } else if ms != 0 && ms % 60_000 == 0 {
            write!(f, "{}m", ms / 60_000)
        } else if ms != 0 && ms % 1_000 == 0 {
            write!(f, "{}s", ms / 1_000)
        } else {
            write!(f, "{}ms", ms)
        }
    }
}

impl std::str::FromStr for TimeValue {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for TimeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TimeValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Millis(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Millis(ms) if ms < 0 => Ok(TimeValue::from_millis(-1)),
            Raw::Millis(ms) => Ok(TimeValue::from_millis(ms)),
            Raw::Text(s) => TimeValue::parse(&s).map_err(serde::de::Error::custom),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_store_path() -> PathBuf {
    PathBuf::from("/var/lib/configsync/configsync.db")
}

fn default_collection() -> String {
    "configsync".to_string()
}

fn default_config_path() -> PathBuf {
    PathBuf::from("/etc/configsync")
}

fn default_scroll_size() -> usize {
    1
}

fn default_scroll_time() -> TimeValue {
    TimeValue::from_mins(1)
}

fn default_flush_interval() -> TimeValue {
    TimeValue::from_mins(1)
}

fn default_startup_retry() -> TimeValue {
    TimeValue::from_secs(15)
}

fn default_startup_wait() -> TimeValue {
    TimeValue::from_secs(30)
}

fn default_heartbeat_interval_ms() -> u64 {
    1000
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_request_timeout_ms() -> u64 {
    60_000
}

fn default_api_address() -> String {
    "0.0.0.0:9280".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            collection: default_collection(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
            scroll_size: default_scroll_size(),
            scroll_time: default_scroll_time(),
            file_updater_enabled: true,
            flush_interval: default_flush_interval(),
            startup_retry: default_startup_retry(),
            startup_wait: default_startup_wait(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_api_address(),
            cors_enabled: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl ConfigSyncConfig {
    /// Read and validate a TOML configuration file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML text
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: ConfigSyncConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the node cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.id.is_empty() {
            return Err(crate::Error::Config("node.id cannot be empty".into()));
        }

        if self.node.bind_address.is_empty() {
            return Err(crate::Error::Config("node.bind_address cannot be empty".into()));
        }

        if !is_plain_identifier(&self.store.collection) {
            return Err(crate::Error::Config(format!(
                "store.collection must be alphanumeric or '_': {}",
                self.store.collection
            )));
        }

        if self.sync.scroll_size == 0 {
            return Err(crate::Error::Config("sync.scroll_size must be at least 1".into()));
        }

        if self.sync.scroll_time.is_disabled() || self.sync.startup_retry.is_disabled() {
            return Err(crate::Error::Config(
                "sync.scroll_time and sync.startup_retry cannot be negative".into(),
            ));
        }

        for peer in &self.cluster.peers {
            if peer.id == self.node.id {
                return Err(crate::Error::Config(format!(
                    "peer {} has the same id as this node",
                    peer.id
                )));
            }
        }

        Ok(())
    }

    /// Address other nodes reach this one on
    pub fn advertise_address(&self) -> &str {
        self.node
            .advertise_address
            .as_deref()
            .unwrap_or(&self.node.bind_address)
    }

    /// Get the base directory files are materialized under
    pub fn config_path(&self) -> &PathBuf {
        &self.sync.config_path
    }

    /// Delay between heartbeat rounds
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.cluster.heartbeat_interval_ms)
    }

    /// Get connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.cluster.connect_timeout_ms)
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.cluster.request_timeout_ms)
    }
}

/// Whether a name can be embedded in SQL as a table name
pub(crate) fn is_plain_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}
