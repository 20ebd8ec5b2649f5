//! ConfigSync - Cluster-wide configuration file synchronization
//!
//! Keeps a directory of configuration files identical on every data node,
//! using a shared store as the single source of truth.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use configsync::api::HttpServer;
use configsync::cluster::{run_heartbeat, NodeActions};
use configsync::config::ConfigSyncConfig;
use configsync::network::{NetworkServer, RequestHandler};
use configsync::service::ConfigSyncService;
use configsync::store::{EntryStore, SqliteStore};

/// ConfigSync - Cluster-wide configuration file synchronization
#[derive(Parser)]
#[command(name = "configsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "configsync.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the ConfigSync node
    Start,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "configsync.toml")]
        output: PathBuf,

        /// Node ID
        #[arg(long, default_value = "node-1")]
        node_id: String,
    },

    /// Validate configuration file
    Validate,

    /// Show node information
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let config = ConfigSyncConfig::from_file(&cli.config).with_context(|| {
                format!("Failed to load configuration from {}", cli.config.display())
            })?;
            let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
            init_logging(level, &config.logging.format);
            run_start(config).await
        }
        Commands::Init { output, node_id } => run_init(output, node_id),
        Commands::Validate => run_validate(cli.config),
        Commands::Info => run_info(cli.config),
    }
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Start the ConfigSync node
async fn run_start(config: ConfigSyncConfig) -> anyhow::Result<()> {
    tracing::info!("Starting ConfigSync node {}...", config.node.id);

    let store: Arc<dyn EntryStore> = Arc::new(
        SqliteStore::open(&config.store.path, &config.store.collection).with_context(|| {
            format!("Failed to open store {}", config.store.path.display())
        })?,
    );
    tracing::info!(
        "Using store {} (collection {})",
        config.store.path.display(),
        config.store.collection
    );

    let service = Arc::new(ConfigSyncService::from_config(&config, Arc::clone(&store)).await);
    let shutdown = CancellationToken::new();

    // Node-to-node transport
    let network = Arc::new(
        NetworkServer::bind(&config.node.bind_address)
            .await
            .with_context(|| format!("Failed to bind {}", config.node.bind_address))?,
    );
    let handler = Arc::new(RequestHandler::new(
        config.node.id.clone(),
        Arc::clone(service.sync()) as Arc<dyn NodeActions>,
        Arc::clone(service.cluster()),
    ));
    let network_task = {
        let network = Arc::clone(&network);
        tokio::spawn(async move { network.serve(handler).await })
    };

    // Heartbeats
    let heartbeat_task = tokio::spawn(run_heartbeat(
        Arc::clone(service.cluster()),
        Arc::clone(service.client()),
        config.heartbeat_interval(),
        shutdown.clone(),
    ));

    // File updater, once the cluster is ready
    let startup_task = service.scheduler().start_when_ready(
        Arc::clone(service.health()),
        config.sync.startup_wait.as_duration().unwrap_or(Duration::from_secs(30)),
        config.sync.startup_retry.as_duration().unwrap_or(Duration::from_secs(15)),
        shutdown.clone(),
    );

    // HTTP API
    let http = HttpServer::new(config.api.clone(), Arc::clone(&service));
    let http_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { http.start(shutdown).await })
    };

    tracing::info!(
        "ConfigSync node {} is up (transport {}, API {})",
        config.node.id,
        config.node.bind_address,
        config.api.bind_address
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
        }
        result = network_task => {
            tracing::error!("Network server exited: {:?}", result);
        }
    }

    shutdown.cancel();
    network.stop();
    service.scheduler().shutdown().await;

    for (name, task) in [("startup", startup_task), ("heartbeat", heartbeat_task)] {
        if let Err(e) = task.await {
            tracing::warn!("{} task failed: {}", name, e);
        }
    }
    match http_task.await {
        Ok(Err(e)) => tracing::warn!("HTTP API stopped with error: {}", e),
        Err(e) => tracing::warn!("HTTP API task failed: {}", e),
        Ok(Ok(())) => {}
    }

    tracing::info!("ConfigSync node stopped");
    Ok(())
}

/// Initialize a new configuration file
fn run_init(output: PathBuf, node_id: String) -> anyhow::Result<()> {
    let config_content = format!(
        r#"# ConfigSync Configuration
# Generated configuration file

[node]
id = "{node_id}"
bind_address = "0.0.0.0:9301"
# advertise_address = "my-host:9301"
data = true

[store]
# Must be on storage shared by every node
path = "/var/lib/configsync/configsync.db"
collection = "configsync"

[sync]
config_path = "/etc/configsync"
scroll_size = 1
scroll_time = "1m"
file_updater_enabled = true
flush_interval = "1m"
startup_retry = "15s"
startup_wait = "30s"

[cluster]
peers = []
# [[cluster.peers]]
# id = "node-2"
# address = "node-2.example.com:9301"
heartbeat_interval_ms = 1000
connect_timeout_ms = 5000
request_timeout_ms = 60000

[api]
enabled = true
bind_address = "0.0.0.0:9280"
cors_enabled = false

[logging]
level = "info"
format = "pretty"
"#
    );

    // Refuse to write something that would not load back
    ConfigSyncConfig::from_toml(&config_content)?;

    std::fs::write(&output, config_content)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to point [store] path at shared storage and list the peers.");
    println!("Then start with: configsync start --config {}", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> anyhow::Result<()> {
    match ConfigSyncConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Node ID: {}", config.node.id);
            println!("  Bind Address: {}", config.node.bind_address);
            println!("  Store: {} ({})", config.store.path.display(), config.store.collection);
            println!("  Config Path: {}", config.config_path().display());
            println!("  Peers: {}", config.cluster.peers.len());
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e.into())
        }
    }
}

/// Show node information
fn run_info(config_path: PathBuf) -> anyhow::Result<()> {
    let config = ConfigSyncConfig::from_file(&config_path)?;

    println!("ConfigSync Node Information");
    println!("===========================");
    println!();
    println!("Node ID:          {}", config.node.id);
    println!("Bind Address:     {}", config.node.bind_address);
    println!("Advertise:        {}", config.advertise_address());
    println!("Data Node:        {}", config.node.data);
    println!();
    println!("Store:");
    println!("  Path:           {}", config.store.path.display());
    println!("  Collection:     {}", config.store.collection);
    println!();
    println!("File Updater:");
    println!("  Enabled:        {}", config.sync.file_updater_enabled);
    println!("  Config Path:    {}", config.config_path().display());
    println!("  Interval:       {}", config.sync.flush_interval);
    println!("  Scroll:         {} per page, keep-alive {}", config.sync.scroll_size, config.sync.scroll_time);
    println!();
    println!("Cluster Peers:");
    if config.cluster.peers.is_empty() {
        println!("  (none)");
    }
    for peer in &config.cluster.peers {
        let role = if peer.data { "data" } else { "client" };
        println!("  {:<16} {:<28} {}", peer.id, peer.address, role);
    }
    println!();
    println!("API:");
    println!("  Enabled:        {}", config.api.enabled);
    println!("  Bind Address:   {}", config.api.bind_address);

    Ok(())
}
