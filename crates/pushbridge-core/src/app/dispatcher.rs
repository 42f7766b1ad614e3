//! Dispatcher - turns a leased task into one HTTP push attempt.
//!
//! # Flow
//! 1. decode the task payload (`PushPayload::decode`)
//! 2. build the request (method, absolute URL, headers, body)
//! 3. send it through the `PushTransport`
//! 4. classify the result into a `DispatchOutcome`
//!
//! Decode and build failures are fatal for the task. A request that gets no
//! response is an ordinary failure and will be retried.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use tracing::{info, warn};

use crate::domain::{DispatchOutcome, LeasedTask, PushPayload, RequestBuildError};
use crate::impls::ReqwestTransport;
use crate::ports::{PushRequest, PushTransport};

/// Validate a decoded payload into a sendable request.
pub fn build_request(payload: &PushPayload) -> Result<PushRequest, RequestBuildError> {
    let method = Method::from_bytes(payload.method.as_bytes())
        .map_err(|_| RequestBuildError::InvalidMethod(payload.method.clone()))?;

    let url = Url::parse(&payload.abs_url).map_err(|e| RequestBuildError::InvalidUrl {
        url: payload.abs_url.clone(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(RequestBuildError::InvalidUrl {
            url: payload.abs_url.clone(),
            reason: format!("unsupported scheme `{}`", url.scheme()),
        });
    }

    let mut headers = HeaderMap::new();
    for (name, value) in payload.headers.iter().flatten() {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| RequestBuildError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        let header_value =
            HeaderValue::from_str(value).map_err(|e| RequestBuildError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        headers.insert(header_name, header_value);
    }

    Ok(PushRequest {
        method,
        url,
        headers,
        body: payload.body().to_string(),
    })
}

pub struct Dispatcher {
    transport: Arc<dyn PushTransport>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn PushTransport>) -> Self {
        Self { transport }
    }

    /// Dispatcher over reqwest, with the request timeout set to the lease.
    pub fn with_lease_timeout(lease_duration: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self::new(Arc::new(ReqwestTransport::new(lease_duration)?)))
    }

    /// Decode the task's payload and push it.
    pub async fn handle(&self, task: &LeasedTask) -> DispatchOutcome {
        let task_id = task.short_id();
        let payload = match PushPayload::decode(task.payload()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(task = task_id, error = %e, "pull task payload failed to parse");
                return DispatchOutcome::FatalDecode {
                    reason: e.to_string(),
                };
            }
        };
        self.execute(&payload, task_id).await
    }

    /// Push one decoded payload. `task_id` only correlates log lines.
    pub async fn execute(&self, payload: &PushPayload, task_id: &str) -> DispatchOutcome {
        let request = match build_request(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(task = task_id, error = %e, "push task payload failed to parse");
                return DispatchOutcome::FatalRequestBuild {
                    reason: e.to_string(),
                };
            }
        };

        info!(
            task = task_id,
            method = %request.method,
            url = %request.url,
            headers = ?request.headers,
            "> push request"
        );

        match self.transport.send(request).await {
            Ok(status) => {
                info!(task = task_id, status, "< push response");
                DispatchOutcome::from_status(status)
            }
            Err(e) => {
                warn!(task = task_id, error = %e, "push request failed");
                DispatchOutcome::transport_failure()
            }
        }
    }
}
