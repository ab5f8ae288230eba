//! Static Service Discovery
//!
//! Returns the backend list given at construction, typically parsed from
//! the `GATEWAY_BACKENDS` environment variable.

use crate::domain::entities::ServerConfig;
use crate::domain::ports::ServiceDiscovery;
use async_trait::async_trait;

#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    servers: Vec<ServerConfig>,
}

impl StaticDiscovery {
    pub fn new(servers: Vec<ServerConfig>) -> Self {
        Self { servers }
    }
}

#[async_trait]
impl ServiceDiscovery for StaticDiscovery {
    async fn discover(&self) -> Vec<ServerConfig> {
        self.servers.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_discover_returns_configured() {
        let discovery = StaticDiscovery::new(vec![
            ServerConfig::new("http://a:80"),
            ServerConfig::new("http://b:80").with_weight(3),
        ]);
        let servers = discovery.discover().await;
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[1].weight, 3);
    }

    #[tokio::test]
    async fn test_discover_empty() {
        assert!(StaticDiscovery::default().discover().await.is_empty());
    }
}
