//! Health Probe Adapters
//!
//! HTTP GET against the server's health path, or a plain TCP connect.

use crate::domain::entities::ServerEntry;
use crate::domain::ports::{HealthProbe, ProbeError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// HTTP probe: a 2xx answer on `{url}{health_path}` is healthy.
pub struct HttpHealthProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpHealthProbe {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Connect(format!("client error: {}", e)))?;
        Ok(Self { client, timeout })
    }

    fn probe_url(server: &ServerEntry) -> String {
        if server.health_path.starts_with('/') {
            format!("{}{}", server.url, server.health_path)
        } else {
            format!("{}/{}", server.url, server.health_path)
        }
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, server: &ServerEntry) -> Result<(), ProbeError> {
        let url = Self::probe_url(server);

        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => Err(ProbeError::Status(resp.status().as_u16())),
            Err(e) if e.is_timeout() => Err(ProbeError::Timeout(self.timeout.as_millis() as u64)),
            Err(e) => Err(ProbeError::Connect(e.to_string())),
        }
    }
}

/// TCP probe: a completed connect to the server's host and port is healthy.
pub struct TcpHealthProbe {
    timeout: Duration,
}

impl TcpHealthProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn target(server: &ServerEntry) -> Result<String, ProbeError> {
        let url = reqwest::Url::parse(&server.url)
            .map_err(|e| ProbeError::InvalidTarget(format!("{}: {}", server.url, e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| ProbeError::InvalidTarget(server.url.clone()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| ProbeError::InvalidTarget(server.url.clone()))?;
        Ok(format!("{}:{}", host, port))
    }
}

#[async_trait]
impl HealthProbe for TcpHealthProbe {
    async fn probe(&self, server: &ServerEntry) -> Result<(), ProbeError> {
        let addr = Self::target(server)?;

        match tokio::time::timeout(self.timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(mut stream)) => {
                let _ = stream.shutdown().await;
                Ok(())
            }
            Ok(Err(e)) => Err(ProbeError::Connect(e.to_string())),
            Err(_) => Err(ProbeError::Timeout(self.timeout.as_millis() as u64)),
        }
    }
}
