//! Test doubles shared by the unit tests.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::ports::{PushRequest, PushTransport, TransportError};

/// Records requests and answers every one with the same result.
pub struct ScriptedTransport {
    reply: Result<u16, TransportError>,
    delay: Duration,
    pub sent: Mutex<Vec<PushRequest>>,
}

impl ScriptedTransport {
    pub fn new(reply: Result<u16, TransportError>) -> Self {
        Self {
            reply,
            delay: Duration::ZERO,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn status(status: u16) -> Self {
        Self::new(Ok(status))
    }

    /// Hold each request for `delay` before answering.
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }
}

#[async_trait]
impl PushTransport for ScriptedTransport {
    async fn send(&self, request: PushRequest) -> Result<u16, TransportError> {
        self.sent.lock().await.push(request);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reply.clone()
    }
}
