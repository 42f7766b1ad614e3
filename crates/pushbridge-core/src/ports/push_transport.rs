//! PushTransport port - issues the HTTP request described by a task.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Method, Url};

/// A validated request, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: String,
}

/// The request never produced a response (connect, DNS, timeout, ...).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Send the request and return the response status code.
    async fn send(&self, request: PushRequest) -> Result<u16, TransportError>;
}
