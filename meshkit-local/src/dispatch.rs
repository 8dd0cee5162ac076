//! Command Dispatcher: whitelist updates and resets over the LAN

use std::sync::Arc;
use std::time::Duration;

use meshkit_proto::local::{DEFAULT_PORT, RequestEnvelope};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::device::{Device, shared_host};
use crate::error::DispatchError;
use crate::retry::{RetryPolicy, send_with_retry};
use crate::transport::{LocalRequest, LocalResponse, LocalTransport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOptions {
    pub port: u16,
    /// Sent as the `token` header when set
    pub token: Option<String>,
    /// Attempts per reset request
    pub try_count: u32,
    /// Wait between attempts of a fanned-out reset
    pub retry_delay: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            token: None,
            try_count: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

pub struct CommandDispatcher<T> {
    transport: Arc<T>,
    options: DispatchOptions,
}

impl<T: LocalTransport> CommandDispatcher<T> {
    pub fn new(transport: Arc<T>, options: DispatchOptions) -> Self {
        Self { transport, options }
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    fn request(
        &self,
        host: &str,
        nodes: Vec<String>,
        envelope: RequestEnvelope,
    ) -> Result<LocalRequest, DispatchError> {
        Ok(LocalRequest::new(host, self.options.port, nodes, envelope)?
            .with_token(self.options.token.clone()))
    }

    /// Add `whitelist` to the mesh the group's nodes belong to.
    ///
    /// One request goes to the group's shared address and the root answers
    /// for everyone. `Ok(true)` iff that first response is HTTP 200; members
    /// are not checked individually.
    pub async fn add_whitelist(
        &self,
        devices: &[Device],
        whitelist: &[String],
    ) -> Result<bool, DispatchError> {
        if whitelist.is_empty() {
            return Err(DispatchError::EmptyWhitelist);
        }
        let host = shared_host(devices)?;
        let nodes = devices.iter().map(|d| d.mac.clone()).collect();
        let request = self
            .request(host, nodes, RequestEnvelope::add_whitelist(whitelist))?
            .with_root_response(true);

        let responses = match self.transport.send(&request).await {
            Ok(response) => vec![response],
            Err(e) => {
                warn!(error = %e, %host, "whitelist request got no response");
                Vec::new()
            }
        };
        let ok = responses.first().is_some_and(LocalResponse::is_http_ok);
        debug!(%host, ok, count = whitelist.len(), "whitelist update");
        Ok(ok)
    }

    /// Factory reset one device, clearing its cached state on success.
    ///
    /// A missing response is retried up to `try_count` times; a response that
    /// arrives but does not report success is final.
    pub async fn reset(&self, device: &mut Device, delay: u32) -> Result<bool, DispatchError> {
        let host = device
            .host
            .as_deref()
            .ok_or_else(|| DispatchError::MissingAddress(device.mac.clone()))?;
        let request = self.request(host, vec![device.mac.clone()], RequestEnvelope::reset(delay))?;

        let policy = RetryPolicy::immediate(self.options.try_count);
        let response = match send_with_retry(self.transport.as_ref(), &request, policy).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, mac = %device.mac, "reset got no response");
                return Ok(false);
            }
        };
        if !reset_succeeded(&response) {
            return Ok(false);
        }
        device.clear_state();
        info!(mac = %device.mac, "device reset");
        Ok(true)
    }

    /// Reset every device independently and return without waiting.
    ///
    /// Each device gets its own task that retries after `retry_delay` until
    /// the device confirms or `try_count` attempts are used. Devices without
    /// an address are skipped. The handles only tell when a task is done;
    /// there is no aggregate result.
    pub fn reset_all(&self, devices: Vec<Device>, delay: u32) -> Vec<JoinHandle<()>> {
        let policy = RetryPolicy {
            tries: self.options.try_count,
            delay: self.options.retry_delay,
        };
        let mut tasks = Vec::with_capacity(devices.len());
        for device in devices {
            let Some(host) = device.host.as_deref() else {
                warn!(mac = %device.mac, "no local address, not resetting");
                continue;
            };
            let request =
                match self.request(host, vec![device.mac.clone()], RequestEnvelope::reset(delay)) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(error = %e, mac = %device.mac, "could not build reset request");
                        continue;
                    }
                };
            let transport = self.transport.clone();
            let span = info_span!("reset", mac = %device.mac);
            tasks.push(tokio::spawn(
                delayed_reset(transport, request, policy).instrument(span),
            ));
        }
        tasks
    }
}

fn reset_succeeded(response: &LocalResponse) -> bool {
    if !response.is_http_ok() {
        debug!(status = response.status, "reset refused");
        return false;
    }
    match response.parse() {
        Ok(body) => body.is_success(),
        Err(e) => {
            warn!(error = %e, "unreadable reset response");
            false
        }
    }
}

async fn delayed_reset<T: LocalTransport>(
    transport: Arc<T>,
    request: LocalRequest,
    policy: RetryPolicy,
) {
    let attempts = policy.attempts();
    for attempt in 1..=attempts {
        match transport.send(&request).await {
            Ok(response) if reset_succeeded(&response) => {
                info!(attempt, "device reset");
                return;
            }
            Ok(response) => debug!(attempt, status = response.status, "reset not confirmed"),
            Err(e) => debug!(attempt, error = %e, "reset got no response"),
        }
        if attempt < attempts {
            policy.pause().await;
        }
    }
    warn!(attempts, "device did not confirm reset");
}
