//! Admin API Server
//!
//! HTTP API for operators: server registration and removal, resource
//! reports, algorithm switching, cache invalidation, the metrics
//! snapshot for dashboards and a live event stream (SSE).

use crate::adapters::outbound::BroadcastEventSink;
use crate::application::Gateway;
use crate::domain::events::GatewayEvent;
use crate::domain::entities::ServerConfig;
use crate::domain::value_objects::Algorithm;
use crate::infrastructure::server_pool::PoolError;
use crate::infrastructure::shutdown::ShutdownController;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

/// Resource report from a backend agent.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceReport {
    pub cpu_usage: f64,
    pub memory_usage: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlgorithmRequest {
    pub algorithm: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CacheClearParams {
    /// Only drop entries whose path starts with this prefix
    pub prefix: Option<String>,
}

/// Registration response.
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub id: String,
    pub registered: bool,
}

/// Health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub servers: usize,
    pub healthy_servers: usize,
}

/// Admin API state.
#[derive(Clone)]
pub struct AdminState {
    pub gateway: Arc<Gateway>,
    /// Source of `/api/v1/events`; the route answers 404 without it
    pub events: Option<Arc<BroadcastEventSink>>,
}

/// Admin API server.
pub struct AdminApi {
    listen_addr: String,
    state: AdminState,
}

impl AdminApi {
    pub fn new(listen_addr: String, gateway: Arc<Gateway>) -> Self {
        Self {
            listen_addr,
            state: AdminState {
                gateway,
                events: None,
            },
        }
    }

    /// Serve the gateway's events at `/api/v1/events`.
    pub fn with_events(mut self, events: Arc<BroadcastEventSink>) -> Self {
        self.state.events = Some(events);
        self
    }

    /// Build the router. Exposed separately so it can be driven in tests.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/api/v1/metrics", get(metrics_handler))
            .route("/api/v1/metrics/reset", post(reset_metrics_handler))
            .route(
                "/api/v1/servers",
                get(list_servers_handler).post(register_handler),
            )
            .route(
                "/api/v1/servers/:id",
                get(get_server_handler).delete(deregister_handler),
            )
            .route("/api/v1/servers/:id/resources", put(resources_handler))
            .route("/api/v1/algorithm", put(algorithm_handler))
            .route("/api/v1/cache/stats", get(cache_stats_handler))
            .route("/api/v1/cache", axum::routing::delete(clear_cache_handler))
            .route("/api/v1/events", get(events_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Run the admin server until shutdown.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub async fn run(&self, shutdown: ShutdownController) -> anyhow::Result<()> {
        let app = self.router();

        let listener = TcpListener::bind(&self.listen_addr).await?;
        tracing::info!("admin API listening on {}", self.listen_addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        Ok(())
    }
}

fn not_found(id: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "id": id,
            "error": "server not found"
        })),
    )
}

// Handler functions

async fn health_handler(State(state): State<AdminState>) -> impl IntoResponse {
    let pool = state.gateway.pool();
    let (healthy, _, _) = pool.status_counts();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        servers: pool.len(),
        healthy_servers: healthy,
    })
}

async fn metrics_handler(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.gateway.snapshot())
}

async fn reset_metrics_handler(State(state): State<AdminState>) -> impl IntoResponse {
    state.gateway.metrics().reset();
    tracing::info!("metrics reset");
    Json(serde_json::json!({ "reset": true }))
}

async fn list_servers_handler(State(state): State<AdminState>) -> impl IntoResponse {
    let servers = state.gateway.pool().snapshots();
    let total = servers.len();
    Json(serde_json::json!({
        "servers": servers,
        "total": total
    }))
}

async fn register_handler(
    State(state): State<AdminState>,
    Json(config): Json<ServerConfig>,
) -> impl IntoResponse {
    match state.gateway.add_server(&config) {
        Ok(id) => (
            StatusCode::CREATED,
            Json(serde_json::to_value(RegisterResponse { id, registered: true }).unwrap_or_default()),
        ),
        Err(e @ PoolError::DuplicateId(_)) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
    }
}

async fn get_server_handler(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.gateway.pool().snapshots().into_iter().find(|s| s.id == id) {
        Some(snapshot) => (
            StatusCode::OK,
            Json(serde_json::to_value(snapshot).unwrap_or_default()),
        ),
        None => not_found(&id),
    }
}

async fn deregister_handler(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if state.gateway.remove_server(&id) {
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": id,
                "removed": true
            })),
        )
    } else {
        not_found(&id)
    }
}

async fn resources_handler(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    Json(report): Json<ResourceReport>,
) -> impl IntoResponse {
    if state
        .gateway
        .update_resources(&id, report.cpu_usage, report.memory_usage)
    {
        tracing::debug!(
            "resources from {}: cpu {:.1}%, memory {:.1}%",
            id,
            report.cpu_usage,
            report.memory_usage
        );
        (StatusCode::OK, Json(serde_json::json!({ "id": id, "updated": true })))
    } else {
        not_found(&id)
    }
}

async fn algorithm_handler(
    State(state): State<AdminState>,
    Json(req): Json<AlgorithmRequest>,
) -> impl IntoResponse {
    match Algorithm::parse(&req.algorithm) {
        Some(algorithm) => {
            let previous = state.gateway.set_algorithm(algorithm);
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "previous": previous,
                    "algorithm": algorithm
                })),
            )
        }
        None => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": format!("unknown algorithm: {}", req.algorithm),
                "supported": Algorithm::ALL
            })),
        ),
    }
}

async fn cache_stats_handler(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.gateway.cache().stats())
}

async fn clear_cache_handler(
    State(state): State<AdminState>,
    Query(params): Query<CacheClearParams>,
) -> impl IntoResponse {
    let cache = state.gateway.cache();
    let removed = match params.prefix.as_deref() {
        Some(prefix) => cache.invalidate_prefix(prefix),
        None => cache.clear(),
    };
    tracing::info!("cache invalidated: {} entries removed", removed);
    Json(serde_json::json!({ "removed": removed }))
}

async fn events_handler(State(state): State<AdminState>) -> axum::response::Response {
    match &state.events {
        Some(sink) => {
            tracing::debug!("event stream subscriber connected");
            Sse::new(event_stream(sink.subscribe()))
                .keep_alive(KeepAlive::default())
                .into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "event stream disabled" })),
        )
            .into_response(),
    }
}

/// One SSE frame per event, named after the event. Lagging subscribers skip
/// what they missed; the stream ends when the sink goes away.
fn event_stream(
    rx: broadcast::Receiver<GatewayEvent>,
) -> impl Stream<Item = Result<Event, axum::Error>> {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let frame = Event::default().event(event.name()).json_data(&event);
                    return Some((frame, rx));
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("event stream subscriber lagged, {} events dropped", missed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::application::GatewayDeps;
    use crate::config::GatewayConfig;
    use crate::domain::entities::{RequestDescriptor, ResponseDescriptor, ServerEntry};
    use crate::domain::ports::{
        EventSink, ForwardError, Forwarder, HealthProbe, NullEventSink, ProbeError,
    };
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct AlwaysUp;

    #[async_trait]
    impl HealthProbe for AlwaysUp {
        async fn probe(&self, _server: &ServerEntry) -> Result<(), ProbeError> {
            Ok(())
        }
    }

    struct Ok200;

    #[async_trait]
    impl Forwarder for Ok200 {
        async fn forward(
            &self,
            _server: &ServerEntry,
            _request: &RequestDescriptor,
        ) -> Result<ResponseDescriptor, ForwardError> {
            Ok(ResponseDescriptor::new(200, "ok"))
        }
    }

    fn gateway(events: Arc<dyn EventSink>) -> Arc<Gateway> {
        let config = GatewayConfig {
            backends: vec![ServerConfig::new("http://10.0.0.1:8080").with_id("a")],
            ..Default::default()
        };
        let gateway = Gateway::new(
            config,
            GatewayDeps {
                probe: Arc::new(AlwaysUp),
                forwarder: Arc::new(Ok200),
                events,
                sessions: None,
            },
        )
        .unwrap();
        Arc::new(gateway)
    }

    fn api() -> AdminApi {
        AdminApi::new("127.0.0.1:0".to_string(), gateway(Arc::new(NullEventSink)))
    }

    async fn call(
        app: Router,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    // ===== Health and Metrics Tests =====

    #[tokio::test]
    async fn test_health_endpoint() {
        let (status, json) = call(api().router(), Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["servers"], 1);
        assert_eq!(json["healthy_servers"], 1);
    }

    #[tokio::test]
    async fn test_metrics_snapshot() {
        let api = api();
        api.state
            .gateway
            .handle(RequestDescriptor::new("GET", "/api/users/42"))
            .await;

        let (status, json) = call(api.router(), Method::GET, "/api/v1/metrics", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["metrics"]["total_requests"], 1);
        assert_eq!(json["metrics"]["requests_by_path"]["/api/users/:id"], 1);
        assert_eq!(json["servers"][0]["total_requests"], 1);
        assert_eq!(json["cache"]["sets"], 1);
    }

    #[tokio::test]
    async fn test_metrics_reset() {
        let api = api();
        api.state
            .gateway
            .handle(RequestDescriptor::new("POST", "/x"))
            .await;

        let (status, _) = call(api.router(), Method::POST, "/api/v1/metrics/reset", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(api.state.gateway.metrics().total_requests(), 0);
    }

    // ===== Server Management Tests =====

    #[tokio::test]
    async fn test_register_and_list() {
        let api = api();
        let (status, json) = call(
            api.router(),
            Method::POST,
            "/api/v1/servers",
            Some(serde_json::json!({ "id": "b", "url": "http://10.0.0.2:8080", "weight": 3 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["id"], "b");

        let (_, json) = call(api.router(), Method::GET, "/api/v1/servers", None).await;
        assert_eq!(json["total"], 2);
        assert_eq!(json["servers"][1]["weight"], 3);
    }

    #[tokio::test]
    async fn test_register_duplicate_conflicts() {
        let (status, _) = call(
            api().router(),
            Method::POST,
            "/api/v1/servers",
            Some(serde_json::json!({ "id": "a", "url": "http://10.0.0.9:8080" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_register_invalid_url() {
        let (status, json) = call(
            api().router(),
            Method::POST,
            "/api/v1/servers",
            Some(serde_json::json!({ "url": "ftp://nope" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn test_get_and_delete_server() {
        let api = api();
        let (status, json) = call(api.router(), Method::GET, "/api/v1/servers/a", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");

        let (status, _) = call(api.router(), Method::DELETE, "/api/v1/servers/a", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(api.router(), Method::GET, "/api/v1/servers/a", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(api.router(), Method::DELETE, "/api/v1/servers/a", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_resources() {
        let api = api();
        let (status, _) = call(
            api.router(),
            Method::PUT,
            "/api/v1/servers/a/resources",
            Some(serde_json::json!({ "cpu_usage": 75.0, "memory_usage": 40.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let entry = api.state.gateway.pool().get("a").unwrap();
        assert_eq!(entry.cpu_usage, 75.0);
        assert_eq!(entry.memory_usage, 40.0);

        let (status, _) = call(
            api.router(),
            Method::PUT,
            "/api/v1/servers/zzz/resources",
            Some(serde_json::json!({ "cpu_usage": 1.0, "memory_usage": 1.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // ===== Algorithm Tests =====

    #[tokio::test]
    async fn test_switch_algorithm() {
        let api = api();
        let (status, json) = call(
            api.router(),
            Method::PUT,
            "/api/v1/algorithm",
            Some(serde_json::json!({ "algorithm": "least-connections" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["previous"], "round-robin");
        assert_eq!(json["algorithm"], "least-connections");
        assert_eq!(
            api.state.gateway.pool().algorithm(),
            Algorithm::LeastConnections
        );
    }

    #[tokio::test]
    async fn test_switch_unknown_algorithm() {
        let (status, json) = call(
            api().router(),
            Method::PUT,
            "/api/v1/algorithm",
            Some(serde_json::json!({ "algorithm": "fastest" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["supported"].as_array().unwrap().len(), 7);
    }

    // ===== Cache Tests =====

    #[tokio::test]
    async fn test_cache_stats_and_clear() {
        let api = api();
        let gw = &api.state.gateway;
        gw.handle(RequestDescriptor::new("GET", "/api/users")).await;
        gw.handle(RequestDescriptor::new("GET", "/api/orders")).await;
        gw.handle(RequestDescriptor::new("GET", "/api/users")).await;

        let (_, json) = call(api.router(), Method::GET, "/api/v1/cache/stats", None).await;
        assert_eq!(json["size"], 2);
        assert_eq!(json["hits"], 1);

        let (_, json) = call(
            api.router(),
            Method::DELETE,
            "/api/v1/cache?prefix=/api/users",
            None,
        )
        .await;
        assert_eq!(json["removed"], 1);

        let (_, json) = call(api.router(), Method::DELETE, "/api/v1/cache", None).await;
        assert_eq!(json["removed"], 1);
        assert!(gw.cache().is_empty());
    }

    // ===== Event Stream Tests =====

    #[tokio::test]
    async fn test_event_stream_delivers_events() {
        let sink = Arc::new(BroadcastEventSink::new(16));
        let gw = gateway(sink.clone());
        let api = AdminApi::new("127.0.0.1:0".to_string(), gw.clone()).with_events(sink.clone());

        let request = Request::builder()
            .uri("/api/v1/events")
            .body(Body::empty())
            .unwrap();
        let response = api.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");
        assert_eq!(sink.subscriber_count(), 1);

        gw.set_algorithm(Algorithm::Random);

        let mut body = response.into_body();
        let frame = tokio::time::timeout(std::time::Duration::from_secs(1), body.frame())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
        assert!(text.contains("event: algorithm:changed"), "{}", text);
        assert!(text.contains("\"random\""), "{}", text);
    }

    #[tokio::test]
    async fn test_event_stream_disabled() {
        let (status, json) = call(api().router(), Method::GET, "/api/v1/events", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "event stream disabled");
    }
}
