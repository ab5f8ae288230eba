//! Proxy Server
//!
//! Public HTTP listener. Every request, whatever its path, is turned into a
//! `RequestDescriptor`, handed to the gateway, and the resulting
//! `ResponseDescriptor` is written back.

use crate::application::Gateway;
use crate::domain::entities::{RequestDescriptor, ResponseDescriptor};
use crate::infrastructure::shutdown::ShutdownController;
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Largest request body buffered for forwarding.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct ProxyState {
    pub gateway: Arc<Gateway>,
    pub shutdown: ShutdownController,
}

/// Public proxy listener.
pub struct ProxyServer {
    listen_addr: String,
    state: ProxyState,
}

impl ProxyServer {
    pub fn new(listen_addr: String, gateway: Arc<Gateway>, shutdown: ShutdownController) -> Self {
        Self {
            listen_addr,
            state: ProxyState { gateway, shutdown },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .fallback(proxy_handler)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Run until shutdown. Open connections finish their current request.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub async fn run(&self) -> anyhow::Result<()> {
        let app = self.router();

        let listener = TcpListener::bind(&self.listen_addr).await?;
        tracing::info!("proxy listening on {}", self.listen_addr);

        let shutdown = self.state.shutdown.clone();
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
        Ok(())
    }
}

async fn proxy_handler(
    State(state): State<ProxyState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    if state.shutdown.is_shutdown() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    let _guard = state.shutdown.request_guard();

    let descriptor = match to_descriptor(request, peer.ip()).await {
        Ok(d) => d,
        Err(response) => return response,
    };

    let response = state.gateway.handle(descriptor).await;
    into_http_response(response)
}

/// First hop of `X-Forwarded-For`, when it parses as an IP.
pub fn client_ip(headers: &HeaderMap, peer: IpAddr) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .unwrap_or(peer)
}

async fn to_descriptor(request: Request, peer: IpAddr) -> Result<RequestDescriptor, Response> {
    let (parts, body) = request.into_parts();

    let mut descriptor = RequestDescriptor::new(parts.method.as_str(), parts.uri.path())
        .with_client_ip(client_ip(&parts.headers, peer));
    if let Some(query) = parts.uri.query() {
        descriptor = descriptor.with_query(query);
    }

    for name in parts.headers.keys() {
        let values: Vec<&str> = parts
            .headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        if !values.is_empty() {
            descriptor = descriptor.with_header(name.as_str(), &values.join(", "));
        }
    }

    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| {
            tracing::debug!("request body rejected: {}", e);
            (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response()
        })?;

    Ok(descriptor.with_body(bytes))
}

fn into_http_response(response: ResponseDescriptor) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut http = Response::new(Body::from(response.body));
    *http.status_mut() = status;

    let headers = http.headers_mut();
    for (name, value) in &response.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::debug!("dropping invalid response header {}", name),
        }
    }
    http
}
