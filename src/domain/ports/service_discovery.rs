//! Service Discovery Port
//!
//! Extension point for dynamic backend discovery. The gateway asks it
//! once at startup for the initial set of targets.

use crate::domain::entities::ServerConfig;
use async_trait::async_trait;

#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    async fn discover(&self) -> Vec<ServerConfig>;
}
