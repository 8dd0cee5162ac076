//! Unsecured handshake channel for devices running with security disabled
//!
//! Frames are `[sequence, flags, payload...]`; bit 0 of `flags` marks that more
//! fragments follow. Configuration goes out as one JSON document split over as
//! many frames as the post-package limit requires. The device answers with
//! JSON documents framed the same way:
//!
//! ```text
//! {"type":"configure","status":0}
//! {"type":"wifi_state", ...}
//! ```
//!
//! `configure` replies become configure results; anything else is passed on
//! as a notification. A reply that is not JSON, or a skipped sequence number,
//! is reported on the error channel.

use meshkit_proto::Status;
use meshkit_proto::ble::errors;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::handshake::{
    ChannelBinding, Handshake, HandshakeError, HandshakeEvent, HandshakeFactory, HandshakeOutput,
};
use crate::params::ConfigureParams;

/// Payload limit before any MTU negotiation (23 byte ATT MTU minus header)
pub const DEFAULT_POST_LIMIT: usize = 20;

/// Package type reported for decoded device notifications
pub const PKG_TYPE_DATA: u8 = 1;

const HEADER_LEN: usize = 2;
const FLAG_MORE: u8 = 0x01;

#[derive(Serialize)]
struct ConfigureFrame<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<i32>,
    params: &'a ConfigureParams,
}

#[derive(Deserialize)]
struct Reply {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    status: Option<i32>,
}

#[derive(Debug)]
pub struct PlainChannel {
    binding: ChannelBinding,
    post_limit: usize,
    tx_sequence: u8,
    rx_sequence: u8,
    pending: Vec<u8>,
}

impl PlainChannel {
    pub fn new(binding: &ChannelBinding) -> Self {
        Self {
            binding: binding.clone(),
            post_limit: DEFAULT_POST_LIMIT,
            tx_sequence: 0,
            rx_sequence: 0,
            pending: Vec::new(),
        }
    }

    fn fragment(&mut self, body: &[u8]) -> Vec<HandshakeOutput> {
        let chunk = self.post_limit.saturating_sub(HEADER_LEN).max(1);
        let count = body.len().div_ceil(chunk).max(1);
        let mut frames = Vec::with_capacity(count);
        for (i, part) in body.chunks(chunk).enumerate() {
            let flags = if i + 1 < count { FLAG_MORE } else { 0 };
            let mut frame = Vec::with_capacity(HEADER_LEN + part.len());
            frame.push(self.tx_sequence);
            frame.push(flags);
            frame.extend_from_slice(part);
            self.tx_sequence = self.tx_sequence.wrapping_add(1);
            frames.push(HandshakeOutput::Write(frame));
        }
        frames
    }

    fn error(&mut self, code: i32) -> Vec<HandshakeOutput> {
        self.pending.clear();
        vec![HandshakeOutput::Event(HandshakeEvent::Error { code })]
    }
}

impl Handshake for PlainChannel {
    fn set_post_limit(&mut self, limit: usize) {
        self.post_limit = limit;
    }

    fn negotiate_security(&mut self) -> Result<Vec<HandshakeOutput>, HandshakeError> {
        debug!(notify = %self.binding.notify, "security disabled on this channel");
        Ok(vec![HandshakeOutput::Event(HandshakeEvent::SecurityResult {
            status: Status::SUCCESS,
        })])
    }

    fn configure(
        &mut self,
        params: &ConfigureParams,
    ) -> Result<Vec<HandshakeOutput>, HandshakeError> {
        params.validate()?;
        let body = serde_json::to_vec(&ConfigureFrame {
            version: self.binding.device_version,
            params,
        })?;
        Ok(self.fragment(&body))
    }

    fn on_notification(&mut self, value: &[u8]) -> Vec<HandshakeOutput> {
        let [sequence, flags, payload @ ..] = value else {
            return self.error(errors::MALFORMED_RESPONSE);
        };
        if *sequence != self.rx_sequence {
            debug!(expected = self.rx_sequence, got = sequence, "sequence mismatch");
            return self.error(errors::SEQUENCE);
        }
        self.rx_sequence = self.rx_sequence.wrapping_add(1);
        self.pending.extend_from_slice(payload);
        if flags & FLAG_MORE != 0 {
            return Vec::new();
        }

        let body = std::mem::take(&mut self.pending);
        let Ok(reply) = serde_json::from_slice::<Reply>(&body) else {
            return self.error(errors::MALFORMED_RESPONSE);
        };
        let event = match reply.kind.as_str() {
            "configure" => HandshakeEvent::ConfigureResult {
                status: reply.status.map_or(Status::FAILURE, Status),
            },
            _ => HandshakeEvent::Notification {
                pkg_type: PKG_TYPE_DATA,
                sub_type: 0,
                data: body,
            },
        };
        vec![HandshakeOutput::Event(event)]
    }
}

/// Creates a [`PlainChannel`] for every session
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainChannelFactory;

impl HandshakeFactory for PlainChannelFactory {
    type Client = PlainChannel;

    fn create(&self, binding: &ChannelBinding) -> PlainChannel {
        PlainChannel::new(binding)
    }
}
