//! Active Health Monitor
//!
//! Periodically probes every pool entry, drives the health state machine
//! and publishes transition events.

use crate::domain::events::GatewayEvent;
use crate::domain::ports::{EventSink, HealthProbe, ProbeError};
use crate::infrastructure::server_pool::ServerPool;
use crate::infrastructure::shutdown::ShutdownController;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Health check configuration.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Interval between check rounds
    pub interval: Duration,
    /// Timeout for each probe; exceeding it counts as a failure
    pub timeout: Duration,
    /// Consecutive failures before an entry is marked unhealthy
    pub max_failures: u32,
    /// Type of probe
    pub check_type: HealthCheckType,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            max_failures: 3,
            check_type: HealthCheckType::Http,
        }
    }
}

/// Type of health check probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthCheckType {
    /// HTTP GET on the entry's health path (expects 2xx)
    Http,
    /// Plain TCP connect to the entry's host and port
    Tcp,
}

impl HealthCheckType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "http" => Some(Self::Http),
            "tcp" => Some(Self::Tcp),
            _ => None,
        }
    }
}

/// Status counts after a check round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
}

/// Active health monitor for the server pool.
pub struct HealthMonitor {
    config: HealthCheckConfig,
    pool: Arc<ServerPool>,
    probe: Arc<dyn HealthProbe>,
    events: Arc<dyn EventSink>,
}

impl HealthMonitor {
    pub fn new(
        config: HealthCheckConfig,
        pool: Arc<ServerPool>,
        probe: Arc<dyn HealthProbe>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            pool,
            probe,
            events,
        }
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Run one check round over every entry.
    ///
    /// Probes run concurrently and without the pool lock; results are
    /// applied one by one afterwards. An entry removed while its probe was
    /// running is skipped.
    pub async fn check_all(&self) -> HealthSummary {
        let entries = self.pool.entries();

        let probes = entries.iter().map(|entry| async move {
            let start = Instant::now();
            let result = self.probe_with_timeout(entry).await;
            tracing::debug!(
                "probe {} ({}) took {}ms: {:?}",
                entry.id,
                entry.url,
                start.elapsed().as_millis(),
                result
            );
            (entry.id.clone(), result)
        });

        for (id, result) in join_all(probes).await {
            if let Some(transition) = self.pool.apply_probe_result(&id, &result) {
                let error = result.as_ref().err().map(ToString::to_string);
                self.pool.publish_transition(&id, transition, error);
            }
        }

        let (healthy, degraded, unhealthy) = self.pool.status_counts();
        let summary = HealthSummary {
            healthy,
            degraded,
            unhealthy,
        };

        tracing::debug!(
            "health check complete: {} healthy, {} degraded, {} unhealthy",
            healthy,
            degraded,
            unhealthy
        );
        self.events.publish(GatewayEvent::HealthCheckComplete {
            healthy,
            degraded,
            unhealthy,
        });
        summary
    }

    /// Probe a single entry and apply the result. Returns None for unknown ids.
    pub async fn check_server(&self, id: &str) -> Option<Result<(), ProbeError>> {
        let entry = self.pool.get(id)?;
        let result = self.probe_with_timeout(&entry).await;
        if let Some(transition) = self.pool.apply_probe_result(id, &result) {
            let error = result.as_ref().err().map(ToString::to_string);
            self.pool.publish_transition(id, transition, error);
        }
        Some(result)
    }

    async fn probe_with_timeout(
        &self,
        entry: &crate::domain::entities::ServerEntry,
    ) -> Result<(), ProbeError> {
        match tokio::time::timeout(self.config.timeout, self.probe.probe(entry)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(self.config.timeout.as_millis() as u64)),
        }
    }

    /// Start the check loop. The first round runs immediately.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub fn start(self: Arc<Self>, shutdown: ShutdownController) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(
                "health monitor started (every {:?}, timeout {:?})",
                self.config.interval,
                self.config.timeout
            );

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.check_all().await;
                    }
                    _ = shutdown.cancelled() => {
                        tracing::info!("health monitor stopped");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::adapters::outbound::BroadcastEventSink;
    use crate::domain::entities::{ServerConfig, ServerEntry};
    use crate::domain::value_objects::HealthStatus;
    use crate::infrastructure::server_pool::PoolConfig;
    use async_trait::async_trait;
    use dashmap::DashMap;

    // ===== Test Helpers =====

    /// Probe answering from a table; unknown ids succeed.
    #[derive(Default)]
    struct ScriptedProbe {
        results: DashMap<String, Result<(), ProbeError>>,
        delay: DashMap<String, Duration>,
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn probe(&self, server: &ServerEntry) -> Result<(), ProbeError> {
            let delay = self.delay.get(&server.id).map(|d| *d);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.results
                .get(&server.id)
                .map(|r| r.clone())
                .unwrap_or(Ok(()))
        }
    }

    fn setup(ids: &[&str]) -> (Arc<ServerPool>, Arc<ScriptedProbe>, Arc<BroadcastEventSink>, HealthMonitor) {
        let events = Arc::new(BroadcastEventSink::new(256));
        let pool = Arc::new(ServerPool::new(PoolConfig::default(), None, events.clone()));
        for id in ids {
            pool.add_server(&ServerConfig::new(format!("http://{}:80", id)).with_id(*id))
                .unwrap();
        }
        let probe = Arc::new(ScriptedProbe::default());
        let monitor = HealthMonitor::new(
            HealthCheckConfig {
                timeout: Duration::from_millis(50),
                ..Default::default()
            },
            pool.clone(),
            probe.clone(),
            events.clone(),
        );
        (pool, probe, events, monitor)
    }

    // ===== Config Tests =====

    #[test]
    fn test_health_check_config_default() {
        let config = HealthCheckConfig::default();
        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.max_failures, 3);
        assert_eq!(config.check_type, HealthCheckType::Http);
    }

    #[test]
    fn test_check_type_parse() {
        assert_eq!(HealthCheckType::parse("TCP"), Some(HealthCheckType::Tcp));
        assert_eq!(HealthCheckType::parse("http"), Some(HealthCheckType::Http));
        assert_eq!(HealthCheckType::parse("icmp"), None);
    }

    // ===== Check Round Tests =====

    #[tokio::test]
    async fn test_check_all_healthy() {
        let (_, _, _, monitor) = setup(&["a", "b"]);
        let summary = monitor.check_all().await;
        assert_eq!(
            summary,
            HealthSummary {
                healthy: 2,
                degraded: 0,
                unhealthy: 0
            }
        );
    }

    #[tokio::test]
    async fn test_failures_walk_state_machine() {
        let (pool, probe, events, monitor) = setup(&["a", "b"]);
        let mut rx = events.subscribe();
        probe
            .results
            .insert("a".to_string(), Err(ProbeError::Status(500)));

        monitor.check_all().await;
        assert_eq!(pool.get("a").unwrap().status, HealthStatus::Degraded);
        monitor.check_all().await;
        let summary = monitor.check_all().await;
        assert_eq!(pool.get("a").unwrap().status, HealthStatus::Unhealthy);
        assert_eq!(summary.unhealthy, 1);
        assert_eq!(summary.healthy, 1);

        let mut names = vec![];
        while let Ok(ev) = rx.try_recv() {
            names.push(ev.name());
        }
        assert_eq!(names.iter().filter(|n| **n == "server:degraded").count(), 1);
        assert_eq!(names.iter().filter(|n| **n == "server:unhealthy").count(), 1);
        assert_eq!(names.iter().filter(|n| **n == "health-check:complete").count(), 3);
    }

    #[tokio::test]
    async fn test_recovery_emits_healthy() {
        let (pool, probe, events, monitor) = setup(&["a"]);
        probe
            .results
            .insert("a".to_string(), Err(ProbeError::Connect("refused".to_string())));
        for _ in 0..3 {
            monitor.check_all().await;
        }
        assert_eq!(pool.get("a").unwrap().status, HealthStatus::Unhealthy);

        let mut rx = events.subscribe();
        probe.results.insert("a".to_string(), Ok(()));
        monitor.check_all().await;

        assert_eq!(pool.get("a").unwrap().status, HealthStatus::Healthy);
        assert_eq!(
            rx.try_recv().unwrap(),
            GatewayEvent::ServerHealthy {
                id: "a".to_string(),
                previous: HealthStatus::Unhealthy
            }
        );
    }

    #[tokio::test]
    async fn test_slow_probe_counts_as_failure() {
        let (pool, probe, _, monitor) = setup(&["slow", "fast"]);
        probe
            .delay
            .insert("slow".to_string(), Duration::from_millis(500));

        let started = Instant::now();
        monitor.check_all().await;
        // probes run concurrently and are bounded by the timeout
        assert!(started.elapsed() < Duration::from_millis(400));

        let slow = pool.get("slow").unwrap();
        assert_eq!(slow.status, HealthStatus::Degraded);
        assert_eq!(slow.consecutive_failures, 1);
        assert_eq!(pool.get("fast").unwrap().status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_check_server_single() {
        let (pool, probe, _, monitor) = setup(&["a"]);
        probe
            .results
            .insert("a".to_string(), Err(ProbeError::Status(503)));

        let result = monitor.check_server("a").await.unwrap();
        assert_eq!(result, Err(ProbeError::Status(503)));
        assert!(pool.get("a").unwrap().last_check.is_some());
        assert!(monitor.check_server("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_start_stops_on_shutdown() {
        let (_, _, events, monitor) = setup(&["a"]);
        let mut rx = events.subscribe();
        let shutdown = ShutdownController::new();

        let handle = Arc::new(monitor).start(shutdown.clone());

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.name(), "health-check:complete");

        shutdown.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
