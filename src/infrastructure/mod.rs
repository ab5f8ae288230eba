//! Infrastructure Layer
//!
//! Stateful components behind the gateway: the server pool, the health
//! monitor, the response cache, metrics and shutdown coordination.

pub mod health_checker;
pub mod metrics_aggregator;
pub mod response_cache;
pub mod server_pool;
pub mod shutdown;
pub mod system_sampler;

pub use health_checker::{HealthCheckConfig, HealthCheckType, HealthMonitor, HealthSummary};
pub use metrics_aggregator::{
    MetricsAggregator, MetricsConfig, MetricsSnapshot, ResponseTimeStats, SystemSample,
};
pub use response_cache::{CacheConfig, CacheStats, ResponseCache};
pub use server_pool::{ConnectionLease, PoolConfig, PoolError, Selection, ServerPool};
pub use shutdown::{shutdown_signal, RequestGuard, ShutdownController};
pub use system_sampler::SystemSampler;
