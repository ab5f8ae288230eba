//! gateway-core Library
//!
//! Traffic-management core of an HTTP gateway: a server pool with seven
//! selection algorithms, health monitoring, sticky sessions, a response
//! cache and request metrics, plus the HTTP surfaces that drive them.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use application::{Gateway, GatewayDeps, GatewaySnapshot};
pub use config::{load_config, GatewayConfig};
pub use domain::entities::{RequestDescriptor, ResponseDescriptor, ServerConfig, ServerEntry};
pub use domain::events::GatewayEvent;
pub use domain::ports::{EventSink, Forwarder, HealthProbe, ServiceDiscovery, SessionRepository};
pub use domain::services::LoadBalancer;
pub use domain::value_objects::{Algorithm, FailureCoupling, HealthStatus};
pub use infrastructure::{ResponseCache, ServerPool, ShutdownController};
