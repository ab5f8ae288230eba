//! Gateway Events
//!
//! Discrete notifications published by the pool, the health monitor and
//! the gateway façade for logging and alerting subscribers.

use crate::domain::value_objects::{Algorithm, HealthStatus};
use serde::Serialize;

/// Event published onto an [`EventSink`](crate::domain::ports::EventSink).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum GatewayEvent {
    ServerAdded {
        id: String,
        url: String,
    },
    ServerRemoved {
        id: String,
    },
    ServerSelected {
        id: String,
        algorithm: Algorithm,
        sticky: bool,
    },
    ServerHealthy {
        id: String,
        previous: HealthStatus,
    },
    ServerDegraded {
        id: String,
        consecutive_failures: u32,
        error: Option<String>,
    },
    ServerUnhealthy {
        id: String,
        consecutive_failures: u32,
        error: Option<String>,
    },
    HealthCheckComplete {
        healthy: usize,
        degraded: usize,
        unhealthy: usize,
    },
    NoServersAvailable {
        total_servers: usize,
    },
    RequestComplete {
        server_id: String,
        success: bool,
        response_time_ms: u64,
    },
    AlgorithmChanged {
        from: Algorithm,
        to: Algorithm,
    },
}

impl GatewayEvent {
    /// Stable event name, e.g. `server:unhealthy`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ServerAdded { .. } => "server:added",
            Self::ServerRemoved { .. } => "server:removed",
            Self::ServerSelected { .. } => "server:selected",
            Self::ServerHealthy { .. } => "server:healthy",
            Self::ServerDegraded { .. } => "server:degraded",
            Self::ServerUnhealthy { .. } => "server:unhealthy",
            Self::HealthCheckComplete { .. } => "health-check:complete",
            Self::NoServersAvailable { .. } => "no-servers-available",
            Self::RequestComplete { .. } => "request:complete",
            Self::AlgorithmChanged { .. } => "algorithm:changed",
        }
    }

    /// Build the event matching a health transition's target state.
    pub fn from_transition(
        id: &str,
        previous: HealthStatus,
        current: HealthStatus,
        consecutive_failures: u32,
        error: Option<String>,
    ) -> Self {
        let id = id.to_string();
        match current {
            HealthStatus::Healthy => Self::ServerHealthy { id, previous },
            HealthStatus::Degraded => Self::ServerDegraded {
                id,
                consecutive_failures,
                error,
            },
            HealthStatus::Unhealthy => Self::ServerUnhealthy {
                id,
                consecutive_failures,
                error,
            },
        }
    }
}
