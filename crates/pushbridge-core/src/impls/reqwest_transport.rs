//! ReqwestTransport - `PushTransport` over a shared `reqwest::Client`.

use std::time::Duration;

use async_trait::async_trait;

use crate::ports::{PushRequest, PushTransport, TransportError};

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// `timeout` bounds each request end to end. The worker passes the lease
    /// duration so a push can never outlive the lease on its task.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PushTransport for ReqwestTransport {
    async fn send(&self, request: PushRequest) -> Result<u16, TransportError> {
        let response = self
            .client
            .request(request.method, request.url)
            .headers(request.headers)
            .body(request.body)
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        Ok(response.status().as_u16())
    }
}
