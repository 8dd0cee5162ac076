//! Transport Adapter seam: the radio link primitives a session drives
//!
//! Every method only *issues* a request. Its outcome comes back later as a
//! [`LinkEvent`] on the queue handed over in [`Transport::attach`]. An `Err`
//! return means the request could not be issued at all.

use std::future::Future;

use meshkit_proto::Status;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::machine::Event;

/// Asynchronous link callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    ConnectionChanged { status: Status, connected: bool },
    ServicesDiscovered { status: Status, services: Vec<GattService> },
    MtuChanged { status: Status, mtu: u16 },
    Notification { characteristic: Uuid, value: Vec<u8> },
}

/// A discovered GATT service and the UUIDs of its characteristics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

/// Queue a transport reports [`LinkEvent`]s to. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LinkEvents {
    tx: mpsc::UnboundedSender<Event>,
}

impl LinkEvents {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { tx }
    }

    /// Returns `false` once the session has gone away.
    pub fn send(&self, event: LinkEvent) -> bool {
        self.tx.send(Event::Link(event)).is_ok()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),
    #[error("no bluetooth adapter found")]
    NoAdapter,
    #[error("no device matching {0:?} found")]
    DeviceNotFound(Option<String>),
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),
    #[error("{0} is not supported by this transport")]
    Unsupported(&'static str),
    #[error("transport is not attached to a session")]
    NotAttached,
}

/// Radio link to exactly one peripheral.
///
/// A session takes the transport by value, so a connection handle can never
/// be driven by two sessions at once.
pub trait Transport: Send + 'static {
    /// Connection handle, used for logging
    fn id(&self) -> String;

    /// Called once by the session before any other request.
    fn attach(&mut self, events: LinkEvents);

    /// Reports the outcome with `ConnectionChanged`. `Err` means the request
    /// broke part way, and the session answers it with [`Transport::disconnect`].
    fn connect(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn discover_services(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn enable_notifications(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn write(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        data: Vec<u8>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Whether [`Transport::request_mtu`] may be called. Queried once per session.
    fn supports_mtu_request(&self) -> bool;

    fn request_mtu(&mut self, mtu: u16) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn disconnect(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Release everything held for the link. No events are sent afterwards.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}
