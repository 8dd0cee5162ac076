use std::time::Duration;

use tracing::warn;

use crate::error::TransportError;
use crate::transport::{LocalRequest, LocalResponse, LocalTransport};

/// How often a request is attempted and how long to wait in between
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub tries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// Back-to-back attempts
    pub fn immediate(tries: u32) -> Self {
        Self {
            tries,
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.tries.max(1)
    }

    pub(crate) async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

/// Send `request` until a response arrives or the attempts run out.
///
/// Only a missing response is retried; any HTTP status is returned as is.
pub async fn send_with_retry<T: LocalTransport>(
    transport: &T,
    request: &LocalRequest,
    policy: RetryPolicy,
) -> Result<LocalResponse, TransportError> {
    let attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        match transport.send(request).await {
            Ok(response) => return Ok(response),
            Err(e) if attempt < attempts => {
                warn!(error = %e, attempt, attempts, host = %request.host, "local request failed, retrying");
                attempt += 1;
                policy.pause().await;
            }
            Err(e) => return Err(e),
        }
    }
}
