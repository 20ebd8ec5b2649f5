//! ConfigSyncCtl - Command line tool for ConfigSync clusters
//!
//! Usage:
//!   configsyncctl put app/app.yml ./app.yml   - Store a file
//!   configsyncctl get app/app.yml             - Print a stored file
//!   configsyncctl ls                          - List stored files
//!   configsyncctl flush                       - Sync every node now
//!   configsyncctl reset                       - Restart every node's file updater

use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Deserialize;

/// ConfigSync Cluster Control Tool
#[derive(Parser)]
#[command(name = "configsyncctl")]
#[command(about = "Manage files and actions of a ConfigSync cluster", long_about = None)]
struct Cli {
    /// API endpoint of any node
    #[arg(short, long, default_value = "http://127.0.0.1:9280")]
    endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a file (content from FILE, or stdin when omitted)
    Put {
        /// Logical path in the store
        path: String,
        /// Local file to upload
        file: Option<PathBuf>,
    },
    /// Print a stored file
    Get {
        path: String,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List stored files
    Ls {
        #[arg(long, default_value_t = 0)]
        from: usize,
        #[arg(long, default_value_t = 10)]
        size: usize,
        /// Sort as field[:asc|desc]
        #[arg(long, default_value = "path")]
        sort: String,
        /// Show write times
        #[arg(short, long)]
        long: bool,
    },
    /// Remove a file from the store (local copies stay)
    Rm { path: String },
    /// Run one sync pass on every data node
    Flush,
    /// Restart the file updater on every data node
    Reset,
    /// Wait for the cluster to reach a health status
    Wait {
        #[arg(long, default_value = "yellow")]
        status: String,
        #[arg(long, default_value = "30s")]
        timeout: String,
    },
    /// Show or change the sync interval (e.g. 30s, 5m, -1 to disable, "default")
    Interval { value: Option<String> },
    /// Show node health and cluster membership
    Status,
}

// ============ API Response Types ============

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    path: Vec<String>,
    #[serde(default)]
    file: Vec<ListedFile>,
}

#[derive(Debug, Deserialize)]
struct ListedFile {
    path: Option<String>,
    #[serde(rename = "@timestamp")]
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ActionResponse {
    #[serde(default)]
    nodes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    result: String,
}

#[derive(Debug, Deserialize)]
struct SettingsResponse {
    flush_interval: String,
    default_flush_interval: String,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    node_id: String,
    health: HealthReport,
    file_updater: UpdaterStatus,
}

#[derive(Debug, Deserialize)]
struct HealthReport {
    status: String,
    data_nodes: usize,
    live_data_nodes: usize,
}

#[derive(Debug, Deserialize)]
struct UpdaterStatus {
    state: String,
    generation: u64,
    passes: u64,
}

#[derive(Debug, Deserialize)]
struct NodeState {
    id: String,
    address: String,
    data: bool,
    status: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let client = Client::new(cli.endpoint.trim_end_matches('/'));

    let result = match cli.command {
        Commands::Put { path, file } => put(&client, &path, file).await,
        Commands::Get { path, output } => get(&client, &path, output).await,
        Commands::Ls { from, size, sort, long } => list(&client, from, size, &sort, long).await,
        Commands::Rm { path } => remove(&client, &path).await,
        Commands::Flush => action(&client, "flush").await,
        Commands::Reset => action(&client, "reset").await,
        Commands::Wait { status, timeout } => wait(&client, &status, &timeout).await,
        Commands::Interval { value } => interval(&client, value).await,
        Commands::Status => status(&client).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

struct Client {
    endpoint: String,
    http: reqwest::Client,
}

impl Client {
    fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, route: &str) -> String {
        format!("{}{}", self.endpoint, route)
    }

    /// Turn a non-success response into an error carrying the server's message
    async fn check(response: reqwest::Response) -> anyhow::Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        match response.json::<ErrorResponse>().await {
            Ok(err) => bail!("{} ({}, {})", err.error, err.code, status),
            Err(_) => bail!("API error: {}", status),
        }
    }
}

// ============ Commands ============

async fn put(client: &Client, path: &str, file: Option<PathBuf>) -> anyhow::Result<()> {
    let content = match file {
        Some(file) => std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };

    let response = client
        .http
        .post(client.url("/_configsync/file"))
        .query(&[("path", path)])
        .body(content)
        .send()
        .await?;
    Client::check(response).await?;
    println!("Stored {}", path);
    Ok(())
}

async fn get(client: &Client, path: &str, output: Option<PathBuf>) -> anyhow::Result<()> {
    let response = client
        .http
        .get(client.url("/_configsync/file"))
        .query(&[("path", path)])
        .send()
        .await?;
    let bytes = Client::check(response).await?.bytes().await?;

    match output {
        Some(file) => std::fs::write(&file, &bytes).with_context(|| format!("writing {}", file.display()))?,
        None => std::io::stdout().write_all(&bytes)?,
    }
    Ok(())
}

async fn list(client: &Client, from: usize, size: usize, sort: &str, long: bool) -> anyhow::Result<()> {
    let mut request = client
        .http
        .get(client.url("/_configsync/file"))
        .query(&[("from", from.to_string()), ("size", size.to_string()), ("sort", sort.to_string())]);
    if long {
        request = request.query(&[("fields", "path,@timestamp")]);
    }

    let listing: ListResponse = Client::check(request.send().await?).await?.json().await?;
    if long {
        for file in listing.file {
            println!(
                "{:<26} {}",
                file.timestamp.unwrap_or_default(),
                file.path.unwrap_or_default()
            );
        }
    } else {
        for path in listing.path {
            println!("{}", path);
        }
    }
    Ok(())
}

async fn remove(client: &Client, path: &str) -> anyhow::Result<()> {
    let response = client
        .http
        .delete(client.url("/_configsync/file"))
        .query(&[("path", path)])
        .send()
        .await?;
    let deleted: DeleteResponse = Client::check(response).await?.json().await?;
    println!("{}: {}", path, deleted.result);
    Ok(())
}

async fn action(client: &Client, name: &str) -> anyhow::Result<()> {
    let response = client
        .http
        .post(client.url(&format!("/_configsync/{}", name)))
        .send()
        .await?;
    let done: ActionResponse = Client::check(response).await?.json().await?;
    println!("{} acknowledged by {} node(s): {}", name, done.nodes.len(), done.nodes.join(", "));
    Ok(())
}

async fn wait(client: &Client, status: &str, timeout: &str) -> anyhow::Result<()> {
    let response = client
        .http
        .get(client.url("/_configsync/wait"))
        .query(&[("status", status), ("timeout", timeout)])
        .send()
        .await?;
    let body: serde_json::Value = Client::check(response).await?.json().await?;
    println!("Cluster is {}", body["status"].as_str().unwrap_or("unknown"));
    Ok(())
}

async fn interval(client: &Client, value: Option<String>) -> anyhow::Result<()> {
    if let Some(value) = value {
        let body = if value == "default" {
            serde_json::json!({ "flush_interval": null })
        } else {
            serde_json::json!({ "flush_interval": value })
        };
        let response = client
            .http
            .put(client.url("/_configsync/settings"))
            .json(&body)
            .send()
            .await?;
        Client::check(response).await?;
    }

    let response = client.http.get(client.url("/_configsync/settings")).send().await?;
    let settings: SettingsResponse = Client::check(response).await?.json().await?;
    println!(
        "flush_interval: {} (default {})",
        settings.flush_interval, settings.default_flush_interval
    );
    Ok(())
}

async fn status(client: &Client) -> anyhow::Result<()> {
    let response = client.http.get(client.url("/health")).send().await?;
    let health: HealthResponse = Client::check(response).await?.json().await?;

    let response = client.http.get(client.url("/cluster/nodes")).send().await?;
    let nodes: Vec<NodeState> = Client::check(response).await?.json().await?;

    println!();
    println!("ConfigSync Cluster Status (configsyncctl v{})", env!("CARGO_PKG_VERSION"));
    println!("========================================");
    println!();
    println!(
        "Node: {}  |  Health: {}  |  Data nodes live: {}/{}",
        health.node_id, health.health.status, health.health.live_data_nodes, health.health.data_nodes
    );
    println!(
        "File updater: {} (generation {}, {} passes)",
        health.file_updater.state, health.file_updater.generation, health.file_updater.passes
    );
    println!();

    println!("{:<20} {:<25} {:<10} {:<6}", "NODE ID", "ADDRESS", "STATUS", "DATA");
    println!("{}", "-".repeat(63));
    for node in &nodes {
        let status_padded = format!("{:<10}", node.status);
        let status_colored = match node.status.as_str() {
            "Active" => format!("\x1b[32m{}\x1b[0m", status_padded),
            "Joining" => format!("\x1b[33m{}\x1b[0m", status_padded),
            "Offline" => format!("\x1b[31m{}\x1b[0m", status_padded),
            _ => status_padded,
        };
        println!(
            "{:<20} {:<25} {} {:<6}",
            node.id,
            node.address,
            status_colored,
            if node.data { "yes" } else { "no" }
        );
    }
    println!();

    Ok(())
}
