//! Event Sink: lifecycle notifications produced for the caller

use meshkit_proto::Status;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Negotiation phase a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Connect,
    ServiceDiscovery,
    CharacteristicDiscovery,
    MtuNegotiation,
    SecurityHandshake,
    Configure,
    /// Link level trouble outside any negotiation phase
    Link,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacteristicRole {
    Write,
    Notify,
}

/// One callback per lifecycle milestone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionEvent {
    ConnectionChanged {
        status: Status,
        connected: bool,
    },
    ServiceDiscovered {
        status: Status,
        service: Uuid,
    },
    CharacteristicDiscovered {
        status: Status,
        role: CharacteristicRole,
        characteristic: Uuid,
    },
    MtuChanged {
        status: Status,
        mtu: u16,
    },
    Notification {
        pkg_type: u8,
        sub_type: u8,
        data: Vec<u8>,
    },
    SecurityResult {
        status: Status,
    },
    ConfigureResult {
        status: Status,
    },
    Error {
        code: i32,
        step: Step,
    },
    SessionClosed,
}

impl ProvisionEvent {
    /// `(status, step)` when this event reports a session-ending failure.
    ///
    /// A negative MTU result is not terminal and a clean link close carries a
    /// success status, so neither yields a failure.
    pub fn terminal_failure(&self) -> Option<(Status, Step)> {
        let (status, step) = match self {
            Self::ConnectionChanged { status, .. } => (*status, Step::Link),
            Self::ServiceDiscovered { status, .. } => (*status, Step::ServiceDiscovery),
            Self::CharacteristicDiscovered { status, .. } => {
                (*status, Step::CharacteristicDiscovery)
            }
            Self::SecurityResult { status } => (*status, Step::SecurityHandshake),
            Self::ConfigureResult { status } => (*status, Step::Configure),
            Self::Error { code, step } => return Some((Status(*code), *step)),
            Self::MtuChanged { .. } | Self::Notification { .. } | Self::SessionClosed => {
                return None;
            }
        };
        (!status.is_success()).then_some((status, step))
    }
}

/// Receives [`ProvisionEvent`]s. Called from the session task, so
/// implementations must return promptly.
pub trait EventSink: Send + 'static {
    fn emit(&mut self, event: &ProvisionEvent);
}

impl EventSink for mpsc::UnboundedSender<ProvisionEvent> {
    fn emit(&mut self, event: &ProvisionEvent) {
        // receiver gone means nobody is listening any more
        let _ = self.send(event.clone());
    }
}

/// Writes every event to the log
#[derive(Debug, Clone)]
pub struct LogSink {
    device: String,
}

impl LogSink {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

impl EventSink for LogSink {
    fn emit(&mut self, event: &ProvisionEvent) {
        let device = &self.device;
        if let Some((status, step)) = event.terminal_failure() {
            warn!(%device, %status, ?step, ?event, "provisioning failed");
            return;
        }
        match event {
            ProvisionEvent::ConnectionChanged { connected, .. } => {
                info!(%device, connected, "connection changed")
            }
            ProvisionEvent::ServiceDiscovered { service, .. } => {
                info!(%device, %service, "service discovered")
            }
            ProvisionEvent::CharacteristicDiscovered {
                role, characteristic, ..
            } => info!(%device, ?role, %characteristic, "characteristic discovered"),
            ProvisionEvent::MtuChanged { status, mtu } => {
                info!(%device, %status, mtu, "mtu changed")
            }
            ProvisionEvent::Notification {
                pkg_type,
                sub_type,
                data,
            } => info!(
                %device,
                pkg_type,
                sub_type,
                data = %String::from_utf8_lossy(data),
                "notification"
            ),
            ProvisionEvent::SecurityResult { .. } => info!(%device, "security negotiated"),
            ProvisionEvent::ConfigureResult { .. } => info!(%device, "device configured"),
            ProvisionEvent::Error { .. } => {}
            ProvisionEvent::SessionClosed => info!(%device, "session closed"),
        }
    }
}
