//! gateway-core - HTTP gateway with load balancing, health checks and caching
//!
//! This is the composition root that wires together all the components.

use gateway_core::adapters::inbound::{AdminApi, ProxyServer};
use gateway_core::adapters::outbound::{
    BroadcastEventSink, DashMapSessionRepository, HttpHealthProbe, ReqwestForwarder,
    StaticDiscovery, TcpHealthProbe, TracingEventSink,
};
use gateway_core::application::{Gateway, GatewayDeps};
use gateway_core::config::load_config;
use gateway_core::domain::ports::{EventSink, FanoutEventSink, HealthProbe, SessionRepository};
use gateway_core::infrastructure::{shutdown_signal, HealthCheckType, ShutdownController};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;

/// How long in-flight requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let mut cfg = load_config()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    tracing::info!(
        "starting gateway listen={} algorithm={} backends={}",
        cfg.listen_addr,
        cfg.load_balancer.algorithm,
        cfg.backends.len()
    );

    // ===== COMPOSITION ROOT =====

    // 1. Outbound adapters
    // Broadcast feeds the admin event stream.
    let broadcast = Arc::new(BroadcastEventSink::new(1024));
    let events: Arc<dyn EventSink> = Arc::new(FanoutEventSink::new(vec![
        Arc::new(TracingEventSink) as Arc<dyn EventSink>,
        broadcast.clone() as Arc<dyn EventSink>,
    ]));

    let probe: Arc<dyn HealthProbe> = match cfg.health_check.check_type {
        HealthCheckType::Http => Arc::new(HttpHealthProbe::new(cfg.health_check.timeout)?),
        HealthCheckType::Tcp => Arc::new(TcpHealthProbe::new(cfg.health_check.timeout)),
    };

    let forwarder = Arc::new(ReqwestForwarder::new(cfg.forward_timeout)?);

    let sessions: Option<Arc<dyn SessionRepository>> = cfg
        .load_balancer
        .sticky_sessions
        .then(|| {
            Arc::new(DashMapSessionRepository::new(cfg.load_balancer.session_ttl))
                as Arc<dyn SessionRepository>
        });

    // 2. Application
    // Backends are registered through discovery rather than at construction.
    let discovery = StaticDiscovery::new(std::mem::take(&mut cfg.backends));
    let gateway = Arc::new(Gateway::new(
        cfg.clone(),
        GatewayDeps {
            probe,
            forwarder,
            events,
            sessions,
        },
    )?);
    let registered = gateway.discover(&discovery).await;
    tracing::info!("registered {} backends", registered);

    let shutdown = ShutdownController::new();
    let background = gateway.start(&shutdown);

    // 3. Inbound adapters
    if cfg.admin_enabled {
        let admin = AdminApi::new(cfg.admin_listen_addr.clone(), gateway.clone())
            .with_events(broadcast.clone());
        let admin_shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = admin.run(admin_shutdown).await {
                tracing::error!("admin API error: {:?}", e);
            }
        });
    }

    tokio::spawn(shutdown_signal(shutdown.clone()));

    let proxy = ProxyServer::new(cfg.listen_addr.clone(), gateway.clone(), shutdown.clone());
    let result = proxy.run().await;

    // Shutdown may not have been requested if the listener failed.
    shutdown.shutdown();
    if !shutdown.wait_for_drain(DRAIN_TIMEOUT).await {
        tracing::warn!("exiting with {} requests in flight", shutdown.in_flight());
    }
    futures::future::join_all(background).await;

    tracing::info!("gateway stopped");
    result
}
