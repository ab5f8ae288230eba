//! Domain Entities - Core business objects
//!
//! These entities represent the core concepts of the gateway domain.
//! They have no I/O and contain only bookkeeping logic.

use crate::domain::value_objects::HealthStatus;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::net::IpAddr;
use std::time::Instant;

/// Number of response-time samples kept per server.
pub const RESPONSE_TIME_WINDOW: usize = 100;

/// Header carrying the tenant marker.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Header carrying the explicit session identifier.
pub const SESSION_HEADER: &str = "x-session-id";

/// Cookie carrying the session identifier when the header is absent.
pub const SESSION_COOKIE: &str = "gateway_session";

/// Administrative description of a backend target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Explicit identifier; generated when absent
    #[serde(default)]
    pub id: Option<String>,
    /// Base URL of the backend (scheme, host, port)
    pub url: String,
    /// Relative weight for weighted and resource-based selection
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Maximum concurrent connections (0 = unlimited)
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Path probed by the HTTP health check
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

fn default_weight() -> u32 {
    1
}
fn default_max_connections() -> u32 {
    100
}
fn default_health_path() -> String {
    "/health".to_string()
}

impl ServerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: None,
            url: url.into(),
            weight: default_weight(),
            max_connections: default_max_connections(),
            health_path: default_health_path(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }
}

/// A health status change produced by a probe or request outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthTransition {
    pub from: HealthStatus,
    pub to: HealthStatus,
    /// Consecutive failure count after the change
    pub consecutive_failures: u32,
}

/// A backend target and its live counters.
///
/// Entries live in the server pool from registration until explicit
/// removal; they never expire on their own.
#[derive(Debug, Clone)]
pub struct ServerEntry {
    pub id: String,
    pub url: String,
    pub health_path: String,
    /// Always >= 1
    pub weight: u32,
    /// 0 = unlimited
    pub max_connections: u32,
    pub active_connections: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    response_times: VecDeque<u64>,
    pub status: HealthStatus,
    /// Probe failures (and request failures under shared coupling)
    pub consecutive_failures: u32,
    /// Request failures under separate coupling
    pub consecutive_request_failures: u32,
    pub last_check: Option<Instant>,
    /// Last reported CPU load, percent
    pub cpu_usage: f64,
    /// Last reported memory load, percent
    pub memory_usage: f64,
    pub registered_at: Instant,
}

impl ServerEntry {
    /// Create an entry from its configuration.
    pub fn new(id: String, config: &ServerConfig) -> Self {
        Self {
            id,
            url: config.url.trim_end_matches('/').to_string(),
            health_path: config.health_path.clone(),
            weight: config.weight.max(1),
            max_connections: config.max_connections,
            active_connections: 0,
            total_requests: 0,
            total_failures: 0,
            response_times: VecDeque::with_capacity(RESPONSE_TIME_WINDOW),
            status: HealthStatus::Healthy,
            consecutive_failures: 0,
            consecutive_request_failures: 0,
            last_check: None,
            cpu_usage: 0.0,
            memory_usage: 0.0,
            registered_at: Instant::now(),
        }
    }

    /// Whether another connection fits under the cap.
    pub fn has_capacity(&self) -> bool {
        self.max_connections == 0 || self.active_connections < self.max_connections
    }

    /// Whether the entry belongs to the available set.
    pub fn is_available(&self) -> bool {
        self.status.is_selectable() && self.has_capacity()
    }

    /// Active connections relative to the cap (0.0 when unlimited).
    pub fn connection_load(&self) -> f64 {
        if self.max_connections == 0 {
            0.0
        } else {
            self.active_connections as f64 / self.max_connections as f64
        }
    }

    /// Rolling average response time in milliseconds (0.0 without samples).
    pub fn avg_response_time(&self) -> f64 {
        if self.response_times.is_empty() {
            return 0.0;
        }
        let sum: u64 = self.response_times.iter().sum();
        sum as f64 / self.response_times.len() as f64
    }

    pub fn response_time_samples(&self) -> usize {
        self.response_times.len()
    }

    /// Push a response time, dropping the oldest sample past the window.
    pub fn record_response_time(&mut self, ms: u64) {
        if self.response_times.len() == RESPONSE_TIME_WINDOW {
            self.response_times.pop_front();
        }
        self.response_times.push_back(ms);
    }

    /// Successful probe (or request under shared coupling).
    pub fn record_success(&mut self) -> Option<HealthTransition> {
        let from = self.status;
        self.consecutive_failures = 0;
        self.status = HealthStatus::Healthy;
        self.transition_from(from)
    }

    /// Failed probe (or request under shared coupling).
    ///
    /// Reaching `max_failures` consecutive failures makes the entry
    /// unhealthy; anything short of that degrades it.
    pub fn record_failure(&mut self, max_failures: u32) -> Option<HealthTransition> {
        let from = self.status;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.status = if self.consecutive_failures >= max_failures {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };
        self.transition_from(from)
    }

    fn transition_from(&self, from: HealthStatus) -> Option<HealthTransition> {
        (from != self.status).then_some(HealthTransition {
            from,
            to: self.status,
            consecutive_failures: self.consecutive_failures,
        })
    }

    /// Serializable view of the entry.
    pub fn snapshot(&self, score: f64) -> ServerSnapshot {
        ServerSnapshot {
            id: self.id.clone(),
            url: self.url.clone(),
            weight: self.weight,
            max_connections: self.max_connections,
            active_connections: self.active_connections,
            total_requests: self.total_requests,
            total_failures: self.total_failures,
            avg_response_time_ms: self.avg_response_time(),
            status: self.status,
            consecutive_failures: self.consecutive_failures,
            consecutive_request_failures: self.consecutive_request_failures,
            last_check_secs_ago: self.last_check.map(|t| t.elapsed().as_secs()),
            cpu_usage: self.cpu_usage,
            memory_usage: self.memory_usage,
            score,
        }
    }
}

/// Serializable view of a pool entry for dashboards and the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct ServerSnapshot {
    pub id: String,
    pub url: String,
    pub weight: u32,
    pub max_connections: u32,
    pub active_connections: u32,
    pub total_requests: u64,
    pub total_failures: u64,
    pub avg_response_time_ms: f64,
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub consecutive_request_failures: u32,
    pub last_check_secs_ago: Option<u64>,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub score: f64,
}

/// Sticky session binding: session -> server.
#[derive(Debug, Clone)]
pub struct SessionBinding {
    /// ID of the server this session is bound to
    pub server_id: String,
    /// When the binding was (re)created
    pub bound_at: Instant,
}

impl SessionBinding {
    pub fn new(server_id: String) -> Self {
        Self {
            server_id,
            bound_at: Instant::now(),
        }
    }
}

/// Inputs the selection engine looks at besides the pool.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub client_ip: Option<IpAddr>,
    pub session_id: Option<String>,
}

impl RequestContext {
    pub fn new(client_ip: Option<IpAddr>, session_id: Option<String>) -> Self {
        Self {
            client_ip,
            session_id,
        }
    }
}

/// HTTP-like inbound request as seen by the gateway core.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    /// Upper-case method
    pub method: String,
    pub path: String,
    /// Raw query string without the leading `?`
    pub query: Option<String>,
    /// Lower-case header names
    pub headers: BTreeMap<String, String>,
    pub client_ip: Option<IpAddr>,
    pub session_id: Option<String>,
    pub body: Bytes,
}

impl RequestDescriptor {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_uppercase(),
            path: path.to_string(),
            query: None,
            headers: BTreeMap::new(),
            client_ip: None,
            session_id: None,
            body: Bytes::new(),
        }
    }

    pub fn with_query(mut self, query: &str) -> Self {
        let query = query.trim_start_matches('?');
        self.query = (!query.is_empty()).then(|| query.to_string());
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_lowercase(), value.to_string());
        self
    }

    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Query parameters sorted by name then value.
    pub fn sorted_query_pairs(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<(&str, &str)> = self
            .query
            .as_deref()
            .unwrap_or_default()
            .split('&')
            .filter(|p| !p.is_empty())
            .map(|p| p.split_once('=').unwrap_or((p, "")))
            .collect();
        pairs.sort_unstable();
        pairs
    }

    /// Path plus query, as forwarded upstream.
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    /// Session identifier from the descriptor, the header, or the cookie.
    pub fn resolve_session_id(&self) -> Option<String> {
        if let Some(id) = &self.session_id {
            return Some(id.clone());
        }
        if let Some(id) = self.header(SESSION_HEADER) {
            return Some(id.to_string());
        }
        self.header("cookie").and_then(|cookies| {
            cookies.split(';').find_map(|c| {
                let (name, value) = c.trim().split_once('=')?;
                (name == SESSION_COOKIE && !value.is_empty()).then(|| value.to_string())
            })
        })
    }

    pub fn context(&self) -> RequestContext {
        RequestContext::new(self.client_ip, self.resolve_session_id())
    }
}

/// Response produced by a backend, the cache, or the gateway itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseDescriptor {
    pub status: u16,
    /// Lower-case header names
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl ResponseDescriptor {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_lowercase(), value.to_string());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn entry() -> ServerEntry {
        ServerEntry::new("s1".to_string(), &ServerConfig::new("http://10.0.0.1:8080/"))
    }

    // ===== ServerConfig Tests =====

    #[test]
    fn test_server_config_defaults() {
        let cfg: ServerConfig = serde_json::from_str(r#"{"url":"http://a:1"}"#).unwrap();
        assert_eq!(cfg.weight, 1);
        assert_eq!(cfg.max_connections, 100);
        assert_eq!(cfg.health_path, "/health");
        assert!(cfg.id.is_none());
    }

    // ===== ServerEntry Tests =====

    #[test]
    fn test_entry_trims_trailing_slash_and_clamps_weight() {
        let e = ServerEntry::new("s".to_string(), &ServerConfig::new("http://a:1/").with_weight(0));
        assert_eq!(e.url, "http://a:1");
        assert_eq!(e.weight, 1);
    }

    #[test]
    fn test_response_window_is_bounded() {
        let mut e = entry();
        for i in 0..150 {
            e.record_response_time(i);
        }
        assert_eq!(e.response_time_samples(), RESPONSE_TIME_WINDOW);
        // samples 50..150 remain
        assert_eq!(e.avg_response_time(), 99.5);
    }

    #[test]
    fn test_avg_response_time_empty() {
        assert_eq!(entry().avg_response_time(), 0.0);
    }

    #[test]
    fn test_capacity_zero_means_unlimited() {
        let mut e = entry();
        e.max_connections = 0;
        e.active_connections = 10_000;
        assert!(e.has_capacity());
        assert_eq!(e.connection_load(), 0.0);
    }

    #[test]
    fn test_capacity_reached() {
        let mut e = entry();
        e.max_connections = 2;
        e.active_connections = 2;
        assert!(!e.has_capacity());
        assert!(!e.is_available());
    }

    // ===== Health State Machine Tests =====

    #[test]
    fn test_failures_degrade_then_unhealthy() {
        let mut e = entry();

        let t1 = e.record_failure(3).unwrap();
        assert_eq!(t1.from, HealthStatus::Healthy);
        assert_eq!(t1.to, HealthStatus::Degraded);

        // degraded -> degraded is not a transition
        assert!(e.record_failure(3).is_none());
        assert_eq!(e.status, HealthStatus::Degraded);

        let t3 = e.record_failure(3).unwrap();
        assert_eq!(t3.to, HealthStatus::Unhealthy);
        assert_eq!(t3.consecutive_failures, 3);
        assert!(!e.is_available());
    }

    #[test]
    fn test_success_resets_to_healthy() {
        let mut e = entry();
        e.record_failure(1);
        assert_eq!(e.status, HealthStatus::Unhealthy);

        let t = e.record_success().unwrap();
        assert_eq!(t.from, HealthStatus::Unhealthy);
        assert_eq!(t.to, HealthStatus::Healthy);
        assert_eq!(e.consecutive_failures, 0);
    }

    #[test]
    fn test_success_on_healthy_is_not_a_transition() {
        let mut e = entry();
        assert!(e.record_success().is_none());
    }

    // ===== RequestDescriptor Tests =====

    #[test]
    fn test_request_header_lookup_case_insensitive() {
        let req = RequestDescriptor::new("get", "/api/x").with_header("X-Tenant-Id", "acme");
        assert_eq!(req.method, "GET");
        assert_eq!(req.header("x-tenant-id"), Some("acme"));
        assert_eq!(req.header("X-TENANT-ID"), Some("acme"));
    }

    #[test]
    fn test_sorted_query_pairs() {
        let req = RequestDescriptor::new("GET", "/").with_query("?b=2&a=1&flag");
        assert_eq!(req.sorted_query_pairs(), vec![("a", "1"), ("b", "2"), ("flag", "")]);
        assert_eq!(req.path_and_query(), "/?b=2&a=1&flag");
    }

    #[test]
    fn test_session_from_header_then_cookie() {
        let req = RequestDescriptor::new("GET", "/").with_header(SESSION_HEADER, "h-1");
        assert_eq!(req.resolve_session_id(), Some("h-1".to_string()));

        let req = RequestDescriptor::new("GET", "/")
            .with_header("cookie", "theme=dark; gateway_session=c-9");
        assert_eq!(req.resolve_session_id(), Some("c-9".to_string()));

        let req = RequestDescriptor::new("GET", "/").with_header("cookie", "theme=dark");
        assert!(req.resolve_session_id().is_none());
    }

    #[test]
    fn test_context_carries_ip_and_session() {
        let ip = IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3));
        let ctx = RequestDescriptor::new("GET", "/")
            .with_client_ip(ip)
            .with_session("sess-1")
            .context();
        assert_eq!(ctx.client_ip, Some(ip));
        assert_eq!(ctx.session_id.as_deref(), Some("sess-1"));
    }

    // ===== ResponseDescriptor Tests =====

    #[test]
    fn test_response_success_range() {
        assert!(ResponseDescriptor::new(204, "").is_success());
        assert!(!ResponseDescriptor::new(304, "").is_success());
        assert!(!ResponseDescriptor::new(500, "").is_success());
    }
}
