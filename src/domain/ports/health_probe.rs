//! Health Probe Port
//!
//! Defines how a single server is checked for liveness.

use crate::domain::entities::ServerEntry;
use async_trait::async_trait;

/// Error returned by a failed probe.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("unhealthy status: {0}")]
    Status(u16),
    #[error("probe timeout after {0}ms")]
    Timeout(u64),
    #[error("invalid target: {0}")]
    InvalidTarget(String),
}

/// Liveness probe for one server.
///
/// The health monitor bounds every call with its own timeout, so
/// implementations may rely on being cancelled.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, server: &ServerEntry) -> Result<(), ProbeError>;
}
