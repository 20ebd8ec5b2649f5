//! HTTP API Server
//!
//! REST API for file operations, cluster actions and status queries.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::cluster::{ClusterSummary, HealthReport, HealthStatus, NodeState};
use crate::config::{ApiConfig, TimeValue};
use crate::error::{Error, Result};
use crate::service::ConfigSyncService;
use crate::store::{ListPage, ListQuery};
use crate::sync::SchedulerStatus;

/// Shared application state
pub struct AppState {
    /// Node service
    pub service: Arc<ConfigSyncService>,
}

/// HTTP API server
pub struct HttpServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(config: ApiConfig, service: Arc<ConfigSyncService>) -> Self {
        Self {
            config,
            state: Arc::new(AppState { service }),
        }
    }

    /// Create the router
    pub fn create_router(state: Arc<AppState>) -> Router {
        Router::new()
            // File operations
            .route(
                "/_configsync/file",
                get(handle_get_file)
                    .post(handle_post_file)
                    .delete(handle_delete_file),
            )
            // Cluster actions
            .route("/_configsync/flush", post(handle_flush))
            .route("/_configsync/reset", post(handle_reset))
            .route("/_configsync/wait", get(handle_wait))
            .route(
                "/_configsync/settings",
                get(handle_get_settings).put(handle_put_settings),
            )
            // Status and info
            .route("/health", get(handle_health))
            .route("/cluster", get(handle_cluster_info))
            .route("/cluster/nodes", get(handle_nodes))
            .route("/cluster/nodes/:node_id", get(handle_node_info))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Serve until `shutdown` fires
    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        if !self.config.enabled {
            tracing::info!("HTTP API disabled");
            return Ok(());
        }

        let mut app = Self::create_router(Arc::clone(&self.state));
        if self.config.cors_enabled {
            app = app.layer(CorsLayer::permissive());
        }

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("HTTP API listening on {}", self.config.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

// ============ Request/Response Types ============

/// Query parameters of `/_configsync/file`
#[derive(Debug, Default, Deserialize)]
pub struct FileParams {
    pub path: Option<String>,
    pub from: Option<usize>,
    pub size: Option<usize>,
    /// Comma-separated field names
    pub fields: Option<String>,
    /// `field[:order]`
    pub sort: Option<String>,
}

/// JSON body of `/_configsync/file`
#[derive(Debug, Default, Deserialize)]
pub struct FileBody {
    pub path: Option<String>,
    /// Base64 content
    pub content: Option<String>,
}

/// Query parameters of `/_configsync/wait`
#[derive(Debug, Default, Deserialize)]
pub struct WaitParams {
    pub status: Option<String>,
    pub timeout: Option<String>,
}

/// Body of `PUT /_configsync/settings`
#[derive(Debug, Deserialize)]
pub struct SettingsRequest {
    /// New interval, or `null` to fall back to each node's default
    pub flush_interval: Option<TimeValue>,
}

/// Dynamic settings
#[derive(Debug, Serialize, Deserialize)]
pub struct SettingsResponse {
    pub flush_interval: TimeValue,
    pub default_flush_interval: TimeValue,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub node_id: String,
    pub health: HealthReport,
    pub file_updater: SchedulerStatus,
}

/// Cluster info response
#[derive(Debug, Serialize)]
pub struct ClusterInfoResponse {
    pub summary: ClusterSummary,
    pub nodes: Vec<NodeState>,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Error returned by handlers
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            Error::InvalidRequest(_) | Error::Encoding(_) => {
                (StatusCode::BAD_REQUEST, "INVALID_REQUEST")
            }
            Error::NotFound(_) | Error::NodeNotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Error::WaitTimeout(_) => (StatusCode::REQUEST_TIMEOUT, "WAIT_TIMEOUT"),
            Error::BroadcastFailed { .. } => (StatusCode::BAD_GATEWAY, "BROADCAST_FAILED"),
            Error::StoreUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE"),
            Error::ShuttingDown => (StatusCode::SERVICE_UNAVAILABLE, "SHUTTING_DOWN"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let error = match self.0 {
            Error::InvalidRequest(message) => message,
            other => other.to_string(),
        };
        if status.is_server_error() {
            tracing::error!("{}", error);
        }

        (
            status,
            Json(ErrorResponse {
                error,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Parse an optional JSON body
fn parse_body(body: &Bytes) -> Result<FileBody> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(FileBody::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| Error::InvalidRequest(format!("invalid request body: {}", e)))
}

fn required_path(path: Option<String>) -> Result<String> {
    match path {
        Some(path) if !path.trim().is_empty() => Ok(path),
        _ => Err(Error::InvalidRequest("path is empty.".into())),
    }
}

// ============ Handlers ============

async fn handle_get_file(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FileParams>,
    body: Bytes,
) -> ApiResult<Response> {
    let path = match params.path.clone() {
        Some(path) => Some(path),
        None => parse_body(&body)?.path,
    };

    if let Some(path) = path {
        return match state.service.get_content(&path).await? {
            Some(content) => Ok((
                [(header::CONTENT_TYPE, "application/octet-stream")],
                content,
            )
                .into_response()),
            None => Err(Error::NotFound(path).into()),
        };
    }

    let mut query = ListQuery::default();
    if let Some(from) = params.from {
        query.from = from;
    }
    if let Some(size) = params.size {
        query.size = size;
    }
    if let Some(sort) = params.sort.as_deref() {
        query = query.with_sort(sort);
    }
    if let Some(fields) = params.fields.as_deref() {
        query.fields = fields
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();
    }

    let response = match state.service.list_paths(&query).await? {
        ListPage::Paths(paths) => json!({ "acknowledged": true, "path": paths }),
        ListPage::Documents(docs) => json!({ "acknowledged": true, "file": docs }),
    };
    Ok(Json(response).into_response())
}

async fn handle_post_file(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FileParams>,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let (path, content) = match params.path {
        Some(path) => (path, body.to_vec()),
        None => {
            let request = parse_body(&body)?;
            let path = required_path(request.path)?;
            // An empty string is an empty file; only a missing key is an error
            let Some(content) = request.content else {
                return Err(Error::InvalidRequest("content is empty.".into()).into());
            };
            let content = {
                use base64::Engine as _;
                base64::engine::general_purpose::STANDARD
                    .decode(content)
                    .map_err(Error::from)?
            };
            (path, content)
        }
    };

    state.service.store_file(&path, &content).await?;
    Ok(Json(json!({ "acknowledged": true })))
}

async fn handle_delete_file(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FileParams>,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let path = match params.path {
        Some(path) => Some(path),
        None => parse_body(&body)?.path,
    };
    let path = required_path(path)?;

    let result = state.service.delete(&path).await?;
    Ok(Json(json!({ "acknowledged": true, "result": result.as_str() })))
}

async fn handle_flush(State(state): State<Arc<AppState>>) -> ApiResult<Json<serde_json::Value>> {
    let report = state.service.flush().await?;
    Ok(Json(json!({ "acknowledged": true, "nodes": report.nodes })))
}

async fn handle_reset(State(state): State<Arc<AppState>>) -> ApiResult<Json<serde_json::Value>> {
    let report = state.service.reset_sync().await?;
    Ok(Json(json!({ "acknowledged": true, "nodes": report.nodes })))
}

async fn handle_wait(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WaitParams>,
) -> ApiResult<Json<serde_json::Value>> {
    let status: HealthStatus = params.status.as_deref().unwrap_or("yellow").parse()?;
    let timeout = match params.timeout.as_deref() {
        Some(raw) => TimeValue::parse(raw)?
            .as_duration()
            .ok_or_else(|| Error::InvalidRequest(format!("invalid timeout: {}", raw)))?,
        None => Duration::from_secs(30),
    };

    let report = state.service.wait_for_status(status, timeout).await?;
    Ok(Json(json!({
        "acknowledged": true,
        "status": report.status,
        "data_nodes": report.data_nodes,
        "live_data_nodes": report.live_data_nodes,
    })))
}

async fn handle_get_settings(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(SettingsResponse {
        flush_interval: state.service.flush_interval().await,
        default_flush_interval: state.service.default_flush_interval(),
    })
}

async fn handle_put_settings(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SettingsRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state.service.set_flush_interval(request.flush_interval).await?;
    Ok(Json(json!({
        "acknowledged": true,
        "flush_interval": state.service.flush_interval().await,
    })))
}

async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        node_id: state.service.node_id().to_string(),
        health: state.service.health_report().await,
        file_updater: state.service.scheduler_status(),
    })
}

async fn handle_cluster_info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let cluster = state.service.cluster();
    Json(ClusterInfoResponse {
        summary: cluster.summary().await,
        nodes: cluster.all_nodes().await,
    })
}

async fn handle_nodes(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.service.cluster().all_nodes().await)
}

async fn handle_node_info(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> ApiResult<Json<NodeState>> {
    match state.service.cluster().get_node(&node_id).await {
        Some(node) => Ok(Json(node)),
        None => Err(Error::NodeNotFound(node_id).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigSyncConfig;
    use crate::store::{EntryStore, SqliteStore};
    use axum::body::Body;
    use axum::http::{Method, Request};
    use tempfile::{tempdir, TempDir};
    use tower::ServiceExt;

    async fn app() -> (TempDir, Router) {
        let dir = tempdir().unwrap();
        let mut config = ConfigSyncConfig::from_toml(
            r#"
[node]
id = "node-1"
bind_address = "127.0.0.1:0"
"#,
        )
        .unwrap();
        config.sync.config_path = dir.path().to_path_buf();

        let store: Arc<dyn EntryStore> = Arc::new(SqliteStore::open_in_memory("configsync").unwrap());
        let service = Arc::new(ConfigSyncService::from_config(&config, store).await);
        let router = HttpServer::create_router(Arc::new(AppState { service }));
        (dir, router)
    }

    async fn send(app: &Router, method: Method, uri: &str, body: impl Into<Body>) -> (StatusCode, Bytes) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(body.into())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes)
    }

    fn json(bytes: &Bytes) -> serde_json::Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[tokio::test]
    async fn test_store_and_get_raw() {
        let (_dir, app) = app().await;

        let (status, body) = send(&app, Method::POST, "/_configsync/file?path=a.txt", "Test1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["acknowledged"], true);

        let (status, body) = send(&app, Method::GET, "/_configsync/file?path=a.txt", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"Test1");
    }

    #[tokio::test]
    async fn test_store_json_body() {
        let (_dir, app) = app().await;

        let (status, _) = send(
            &app,
            Method::POST,
            "/_configsync/file",
            r#"{"path": "conf/b.yml", "content": "a2V5OiB2YWx1ZQ=="}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&app, Method::GET, "/_configsync/file?path=conf/b.yml", Body::empty()).await;
        assert_eq!(&body[..], b"key: value");

        let (status, body) = send(
            &app,
            Method::POST,
            "/_configsync/file",
            r#"{"path": "c.yml", "content": "not base64!"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn test_empty_file_is_stored_and_materialized() {
        let (dir, app) = app().await;

        let (status, _) = send(&app, Method::POST, "/_configsync/file?path=empty.conf", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(
            &app,
            Method::POST,
            "/_configsync/file",
            r#"{"path": "conf/blank.yml", "content": ""}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, Method::GET, "/_configsync/file?path=empty.conf", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());

        let (status, _) = send(&app, Method::POST, "/_configsync/flush", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        for name in ["empty.conf", "conf/blank.yml"] {
            let meta = std::fs::metadata(dir.path().join(name)).unwrap();
            assert_eq!(meta.len(), 0, "{}", name);
        }
    }

    #[tokio::test]
    async fn test_json_body_without_content_is_rejected() {
        let (_dir, app) = app().await;

        let (status, body) = send(&app, Method::POST, "/_configsync/file", r#"{"path": "a.txt"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["error"], "content is empty.");
    }

    #[tokio::test]
    async fn test_missing_file_is_404() {
        let (_dir, app) = app().await;

        let (status, body) = send(&app, Method::GET, "/_configsync/file?path=nope.txt", Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json(&body)["error"], "nope.txt is not found.");
    }

    #[tokio::test]
    async fn test_list_paths_and_fields() {
        let (_dir, app) = app().await;
        send(&app, Method::POST, "/_configsync/file?path=b.txt", "2").await;
        send(&app, Method::POST, "/_configsync/file?path=a.txt", "1").await;

        let (status, body) = send(&app, Method::GET, "/_configsync/file", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["path"], json!(["a.txt", "b.txt"]));

        let (_, body) = send(
            &app,
            Method::GET,
            "/_configsync/file?fields=path,@timestamp&sort=path:desc&size=1",
            Body::empty(),
        )
        .await;
        let files = json(&body)["file"].as_array().unwrap().clone();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0]["path"], "b.txt");
        assert!(files[0]["@timestamp"].is_string());

        let (status, _) = send(&app, Method::GET, "/_configsync/file?sort=content", Body::empty()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            Method::GET,
            "/_configsync/file?size=18446744073709551615",
            Body::empty(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn test_delete() {
        let (_dir, app) = app().await;
        send(&app, Method::POST, "/_configsync/file?path=a.txt", "1").await;

        let (_, body) = send(&app, Method::DELETE, "/_configsync/file?path=a.txt", Body::empty()).await;
        assert_eq!(json(&body)["result"], "deleted");

        let (_, body) = send(&app, Method::DELETE, "/_configsync/file", r#"{"path": "a.txt"}"#).await;
        assert_eq!(json(&body)["result"], "not_found");

        let (status, body) = send(&app, Method::DELETE, "/_configsync/file", Body::empty()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["error"], "path is empty.");
    }

    #[tokio::test]
    async fn test_flush_and_reset() {
        let (dir, app) = app().await;
        send(&app, Method::POST, "/_configsync/file?path=a.txt", "Test1").await;

        let (status, body) = send(&app, Method::POST, "/_configsync/flush", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["nodes"], json!(["node-1"]));
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"Test1");

        let (status, _) = send(&app, Method::POST, "/_configsync/reset", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&app, Method::GET, "/health", Body::empty()).await;
        let health = json(&body);
        assert_eq!(health["file_updater"]["generation"], 1);
        assert_eq!(health["health"]["status"], "green");
    }

    #[tokio::test]
    async fn test_wait_and_settings() {
        let (_dir, app) = app().await;

        let (status, body) = send(&app, Method::GET, "/_configsync/wait?status=green&timeout=1s", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["status"], "green");

        let (status, _) = send(&app, Method::GET, "/_configsync/wait?status=purple", Body::empty()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let request = Request::builder()
            .method(Method::PUT)
            .uri("/_configsync/settings")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"flush_interval": "30s"}"#))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let (_, body) = send(&app, Method::GET, "/_configsync/settings", Body::empty()).await;
        let settings: SettingsResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(settings.flush_interval, TimeValue::from_secs(30));
        assert_eq!(settings.default_flush_interval, TimeValue::from_mins(1));
    }

    #[tokio::test]
    async fn test_cluster_nodes() {
        let (_dir, app) = app().await;

        let (status, body) = send(&app, Method::GET, "/cluster/nodes", Body::empty()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)[0]["id"], "node-1");

        let (status, body) = send(&app, Method::GET, "/cluster/nodes/node-9", Body::empty()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json(&body)["code"], "NOT_FOUND");
    }
}
