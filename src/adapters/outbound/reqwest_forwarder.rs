//! Reqwest Forwarder
//!
//! Sends the request to `{server.url}{path}?{query}` and buffers the
//! upstream response.

use crate::domain::entities::{RequestDescriptor, ResponseDescriptor, ServerEntry};
use crate::domain::ports::{ForwardError, Forwarder};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;

/// Connection-scoped headers that are never forwarded in either direction.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.contains(&name) || name == "content-length"
}

pub struct ReqwestForwarder {
    client: reqwest::Client,
}

impl ReqwestForwarder {
    pub fn new(timeout: Duration) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ForwardError::Upstream(format!("client error: {}", e)))?;
        Ok(Self { client })
    }

    fn upstream_headers(request: &RequestDescriptor) -> Result<HeaderMap, ForwardError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            if is_hop_by_hop(name) {
                continue;
            }
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ForwardError::InvalidRequest(format!("header {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ForwardError::InvalidRequest(format!("header {}: {}", name, e)))?;
            headers.insert(name, value);
        }

        // An existing X-Forwarded-For chain is passed through untouched.
        if let (Some(ip), None) = (request.client_ip, request.header("x-forwarded-for")) {
            if let Ok(value) = HeaderValue::from_str(&ip.to_string()) {
                headers.insert("x-forwarded-for", value);
            }
        }
        Ok(headers)
    }
}

#[async_trait]
impl Forwarder for ReqwestForwarder {
    async fn forward(
        &self,
        server: &ServerEntry,
        request: &RequestDescriptor,
    ) -> Result<ResponseDescriptor, ForwardError> {
        let url = format!("{}{}", server.url, request.path_and_query());
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| ForwardError::InvalidRequest(format!("method {}: {}", request.method, e)))?;

        let mut builder = self
            .client
            .request(method, &url)
            .headers(Self::upstream_headers(request)?);
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ForwardError::Timeout
            } else {
                ForwardError::Upstream(e.to_string())
            }
        })?;

        let status = resp.status().as_u16();
        let mut response = ResponseDescriptor::new(status, bytes::Bytes::new());
        for (name, value) in resp.headers() {
            if is_hop_by_hop(name.as_str()) {
                continue;
            }
            if let Ok(value) = value.to_str() {
                response = response.with_header(name.as_str(), value);
            }
        }

        response.body = resp.bytes().await.map_err(|e| {
            if e.is_timeout() {
                ForwardError::Timeout
            } else {
                ForwardError::Upstream(e.to_string())
            }
        })?;

        Ok(response)
    }
}
