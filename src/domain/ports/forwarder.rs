//! Forwarder Port
//!
//! Sends a request to the selected server and returns its response.

use crate::domain::entities::{RequestDescriptor, ResponseDescriptor, ServerEntry};
use async_trait::async_trait;

/// Error returned when a request could not be forwarded.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("upstream request failed: {0}")]
    Upstream(String),
    #[error("upstream timeout")]
    Timeout,
    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),
}

#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(
        &self,
        server: &ServerEntry,
        request: &RequestDescriptor,
    ) -> Result<ResponseDescriptor, ForwardError>;
}
