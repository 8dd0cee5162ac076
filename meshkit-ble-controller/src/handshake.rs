//! Handshake collaborator seam
//!
//! The collaborator performs the security exchange and encodes configuration
//! commands. It never touches the radio: every method returns the frames to
//! write and the results it can already report, and the owning session does
//! the I/O. That keeps the session the only writer on its link.

use meshkit_proto::Status;
use meshkit_proto::ble::errors;
use uuid::Uuid;

use crate::params::{ConfigureParams, ParamsError};

/// Where the collaborator's frames go and where replies come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBinding {
    pub service: Uuid,
    pub write: Uuid,
    pub notify: Uuid,
    /// Protocol variant selector agreed for this session, if any
    pub device_version: Option<i32>,
}

/// Results reported by the collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeEvent {
    SecurityResult { status: Status },
    ConfigureResult { status: Status },
    /// Decoded device notification that is not a command result
    Notification {
        pkg_type: u8,
        sub_type: u8,
        data: Vec<u8>,
    },
    /// Out-of-band protocol corruption (bad checksum, malformed reply, ...)
    Error { code: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutput {
    /// Frame to write to the outbound characteristic
    Write(Vec<u8>),
    Event(HandshakeEvent),
}

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("security negotiation refused: {0}")]
    Security(String),
    #[error("invalid configuration: {0}")]
    Params(#[from] ParamsError),
    #[error("failed to encode configuration: {0}")]
    Encode(#[from] serde_json::Error),
}

impl HandshakeError {
    /// Code reported on the error channel when a request is refused outright
    pub fn code(&self) -> i32 {
        match self {
            Self::Security(_) | Self::Params(_) => errors::WRITE_REFUSED,
            Self::Encode(_) => errors::MALFORMED_RESPONSE,
        }
    }
}

pub trait Handshake: Send + 'static {
    /// Largest payload a single write may carry
    fn set_post_limit(&mut self, limit: usize);

    fn negotiate_security(&mut self) -> Result<Vec<HandshakeOutput>, HandshakeError>;

    fn configure(&mut self, params: &ConfigureParams)
    -> Result<Vec<HandshakeOutput>, HandshakeError>;

    /// Feed one inbound frame from the notify characteristic
    fn on_notification(&mut self, value: &[u8]) -> Vec<HandshakeOutput>;
}

/// Builds the handshake client once both characteristics are known
pub trait HandshakeFactory: Send + 'static {
    type Client: Handshake;

    fn create(&self, binding: &ChannelBinding) -> Self::Client;
}

impl<F, C> HandshakeFactory for F
where
    F: Fn(&ChannelBinding) -> C + Send + 'static,
    C: Handshake,
{
    type Client = C;

    fn create(&self, binding: &ChannelBinding) -> C {
        self(binding)
    }
}
