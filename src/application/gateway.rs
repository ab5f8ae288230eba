//! Gateway Façade - Main application use case
//!
//! Composes the server pool, health monitor, response cache and metrics
//! into the request path:
//! cache lookup -> selection -> forward -> record outcome -> cache store.

use crate::config::{ConfigError, GatewayConfig};
use crate::domain::entities::{
    RequestDescriptor, ResponseDescriptor, ServerConfig, ServerSnapshot,
};
use crate::domain::ports::{EventSink, Forwarder, HealthProbe, ServiceDiscovery, SessionRepository};
use crate::domain::value_objects::Algorithm;
use crate::infrastructure::health_checker::{HealthMonitor, HealthSummary};
use crate::infrastructure::metrics_aggregator::{MetricsAggregator, MetricsSnapshot};
use crate::infrastructure::response_cache::{CacheStats, ResponseCache};
use crate::infrastructure::server_pool::{PoolConfig, PoolError, ServerPool};
use crate::infrastructure::shutdown::ShutdownController;
use crate::infrastructure::system_sampler::SystemSampler;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Marker header: `HIT` when served from cache, `MISS` when forwarded.
pub const CACHE_HEADER: &str = "x-cache";

/// Id of the server that produced a forwarded response.
pub const SERVER_HEADER: &str = "x-gateway-server";

/// Collaborators injected into the gateway.
pub struct GatewayDeps {
    pub probe: Arc<dyn HealthProbe>,
    pub forwarder: Arc<dyn Forwarder>,
    pub events: Arc<dyn EventSink>,
    /// Sticky session store; sticky sessions are off without it
    pub sessions: Option<Arc<dyn SessionRepository>>,
}

/// Everything a dashboard needs in one JSON document.
#[derive(Debug, Clone, Serialize)]
pub struct GatewaySnapshot {
    pub timestamp: DateTime<Utc>,
    pub algorithm: Algorithm,
    pub sticky_sessions: bool,
    pub active_sessions: usize,
    pub health: HealthSummary,
    pub servers: Vec<ServerSnapshot>,
    pub cache: CacheStats,
    pub metrics: MetricsSnapshot,
}

/// Gateway façade.
///
/// Owns every stateful component; nothing here is process-global.
pub struct Gateway {
    config: GatewayConfig,
    pool: Arc<ServerPool>,
    sessions: Option<Arc<dyn SessionRepository>>,
    cache: Arc<ResponseCache>,
    metrics: Arc<MetricsAggregator>,
    monitor: Arc<HealthMonitor>,
    forwarder: Arc<dyn Forwarder>,
}

impl Gateway {
    /// Build the gateway and register the configured backends.
    pub fn new(config: GatewayConfig, deps: GatewayDeps) -> Result<Self, ConfigError> {
        config.validate()?;

        let sessions = if config.load_balancer.sticky_sessions {
            deps.sessions
        } else {
            None
        };

        let pool = Arc::new(ServerPool::new(
            PoolConfig {
                algorithm: config.load_balancer.algorithm,
                failure_coupling: config.load_balancer.failure_coupling,
                max_failures: config.health_check.max_failures,
            },
            sessions.clone(),
            deps.events.clone(),
        ));

        let monitor = Arc::new(HealthMonitor::new(
            config.health_check.clone(),
            pool.clone(),
            deps.probe,
            deps.events,
        ));

        let gateway = Self {
            pool,
            sessions,
            cache: Arc::new(ResponseCache::new(config.cache.clone())),
            metrics: Arc::new(MetricsAggregator::new(config.metrics.clone())),
            monitor,
            forwarder: deps.forwarder,
            config,
        };

        for backend in gateway.config.backends.clone() {
            gateway
                .add_server(&backend)
                .map_err(|e| ConfigError::InvalidBackend(backend.url.clone(), e.to_string()))?;
        }

        Ok(gateway)
    }

    /// Register whatever the discovery source reports. Failures are logged
    /// and skipped.
    pub async fn discover(&self, discovery: &dyn ServiceDiscovery) -> usize {
        let mut added = 0;
        for server in discovery.discover().await {
            match self.add_server(&server) {
                Ok(_) => added += 1,
                Err(e) => tracing::warn!("discovered server {} rejected: {}", server.url, e),
            }
        }
        added
    }

    /// Handle one request end to end.
    ///
    /// Never fails: no eligible server yields 503, a forwarding error 502.
    pub async fn handle(&self, request: RequestDescriptor) -> ResponseDescriptor {
        let start = Instant::now();

        let cache_key = (self.cache.is_enabled()
            && (request.method == "GET" || request.method == "HEAD"))
            .then(|| ResponseCache::fingerprint(&request));

        if let Some(key) = &cache_key {
            if let Some(hit) = self.cache.get(key) {
                let elapsed = start.elapsed().as_millis() as u64;
                self.metrics
                    .record_request(&request.method, &request.path, hit.status, elapsed);
                tracing::debug!("cache hit {} {}", request.method, request.path);
                return hit.with_header(CACHE_HEADER, "HIT");
            }
        }

        let ctx = request.context();
        // The lease gives the slot back even if this future is dropped mid-forward.
        let Some(lease) = self.pool.acquire(&ctx) else {
            let elapsed = start.elapsed().as_millis() as u64;
            self.metrics
                .record_request(&request.method, &request.path, 503, elapsed);
            return json_error(503, "no servers available");
        };
        let server_id = lease.server().id.clone();

        let result = self.forwarder.forward(lease.server(), &request).await;
        let elapsed = start.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                let success = response.status < 500;
                lease.complete(success, elapsed);
                self.metrics
                    .record_request(&request.method, &request.path, response.status, elapsed);

                if let Some(key) = &cache_key {
                    if ResponseCache::should_cache(&request, &response) {
                        self.cache.set(key, &request.path, response.clone(), None);
                    }
                }

                response
                    .with_header(CACHE_HEADER, "MISS")
                    .with_header(SERVER_HEADER, &server_id)
            }
            Err(e) => {
                tracing::warn!(
                    "forward {} {} to {} failed: {}",
                    request.method,
                    request.path,
                    server_id,
                    e
                );
                lease.complete(false, elapsed);
                self.metrics
                    .record_request(&request.method, &request.path, 502, elapsed);
                json_error(502, "upstream request failed").with_header(SERVER_HEADER, &server_id)
            }
        }
    }

    /// Start every background loop. They stop on shutdown.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub fn start(&self, shutdown: &ShutdownController) -> Vec<JoinHandle<()>> {
        let mut handles = vec![self.monitor.clone().start(shutdown.clone())];

        if self.cache.is_enabled() {
            handles.push(self.cache.clone().start_sweeper(shutdown.clone()));
        }

        if let Some(sessions) = self.sessions.clone() {
            handles.push(spawn_session_sweep(
                sessions,
                self.config.load_balancer.session_cleanup_interval,
                shutdown.clone(),
            ));
        }

        handles.push(SystemSampler::new().start(
            self.metrics.clone(),
            self.config.metrics.system_sample_interval,
            shutdown.clone(),
        ));

        if !self.config.metrics.snapshot_log_interval.is_zero() {
            handles.push(spawn_snapshot_logger(
                self.metrics.clone(),
                self.pool.clone(),
                self.config.metrics.snapshot_log_interval,
                shutdown.clone(),
            ));
        }

        tracing::info!(
            "gateway started: {} servers, algorithm {}, sticky sessions {}",
            self.pool.len(),
            self.pool.algorithm(),
            self.sessions.is_some()
        );
        handles
    }

    pub fn snapshot(&self) -> GatewaySnapshot {
        let (healthy, degraded, unhealthy) = self.pool.status_counts();
        GatewaySnapshot {
            timestamp: Utc::now(),
            algorithm: self.pool.algorithm(),
            sticky_sessions: self.sessions.is_some(),
            active_sessions: self.sessions.as_ref().map(|s| s.count()).unwrap_or(0),
            health: HealthSummary {
                healthy,
                degraded,
                unhealthy,
            },
            servers: self.pool.snapshots(),
            cache: self.cache.stats(),
            metrics: self.metrics.snapshot(),
        }
    }

    // ===== Administrative pass-throughs =====

    pub fn add_server(&self, config: &ServerConfig) -> Result<String, PoolError> {
        self.pool.add_server(config)
    }

    pub fn remove_server(&self, id: &str) -> bool {
        self.pool.remove_server(id)
    }

    pub fn update_resources(&self, id: &str, cpu_usage: f64, memory_usage: f64) -> bool {
        self.pool.update_resources(id, cpu_usage, memory_usage)
    }

    pub fn set_algorithm(&self, algorithm: Algorithm) -> Algorithm {
        self.pool.set_algorithm(algorithm)
    }

    pub fn pool(&self) -> &Arc<ServerPool> {
        &self.pool
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

fn json_error(status: u16, message: &str) -> ResponseDescriptor {
    let body = serde_json::json!({ "error": message }).to_string();
    ResponseDescriptor::new(status, body).with_header("content-type", "application/json")
}

fn spawn_session_sweep(
    sessions: Arc<dyn SessionRepository>,
    interval: Duration,
    shutdown: ShutdownController,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = sessions.purge_expired();
                    if removed > 0 {
                        tracing::debug!("session sweep removed {} expired bindings", removed);
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
    })
}

fn spawn_snapshot_logger(
    metrics: Arc<MetricsAggregator>,
    pool: Arc<ServerPool>,
    interval: Duration,
    shutdown: ShutdownController,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snap = metrics.snapshot();
                    let (healthy, degraded, unhealthy) = pool.status_counts();
                    tracing::info!(
                        "requests={} error_rate={:.1}% avg={:.0}ms p95={}ms health={:.0} servers={}/{}/{}",
                        snap.total_requests,
                        snap.error_rate,
                        snap.response_times.avg,
                        snap.response_times.p95,
                        snap.health_score,
                        healthy,
                        degraded,
                        unhealthy
                    );
                }
                _ = shutdown.cancelled() => break,
            }
        }
    })
}
