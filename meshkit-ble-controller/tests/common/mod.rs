//! Scripted transport and handshake doubles shared by the session tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use meshkit_ble_controller::handshake::{
    ChannelBinding, Handshake, HandshakeError, HandshakeEvent, HandshakeFactory, HandshakeOutput,
};
use meshkit_ble_controller::link::{GattService, LinkEvent, LinkEvents, Transport, TransportError};
use meshkit_ble_controller::params::ConfigureParams;
use meshkit_proto::Status;
use meshkit_proto::ble::{
    NOTIFY_CHARACTERISTIC_UUID, SERVICE_UUID, WRITE_CHARACTERISTIC_UUID, errors,
};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect,
    DiscoverServices,
    EnableNotifications(Uuid),
    Write(Vec<u8>),
    RequestMtu(u16),
    Disconnect,
    Close,
}

/// How the fake peripheral answers
#[derive(Debug, Clone)]
pub struct Script {
    pub connect: Status,
    /// `connect` returns `Err` after the radio came up
    pub connect_issue_fails: bool,
    pub services: Vec<GattService>,
    pub mtu_supported: bool,
    /// `request_mtu` returns `Err` instead of reporting a result
    pub mtu_issue_fails: bool,
    pub mtu_result: (Status, u16),
    pub fail_writes: bool,
    pub fail_subscribe: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            connect: Status::SUCCESS,
            connect_issue_fails: false,
            services: vec![provisioning_service()],
            mtu_supported: true,
            mtu_issue_fails: false,
            mtu_result: (Status::SUCCESS, 128),
            fail_writes: false,
            fail_subscribe: false,
        }
    }
}

pub fn provisioning_service() -> GattService {
    GattService {
        uuid: SERVICE_UUID,
        characteristics: vec![WRITE_CHARACTERISTIC_UUID, NOTIFY_CHARACTERISTIC_UUID],
    }
}

/// Test side view of a [`MockTransport`] after it moved into a session
#[derive(Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<Call>>>,
    events: Arc<Mutex<Option<LinkEvents>>>,
}

impl Recorder {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Write(data) => Some(data),
                _ => None,
            })
            .collect()
    }

    /// Push a link event as if the radio reported it
    pub fn inject(&self, event: LinkEvent) -> bool {
        match self.events.lock().unwrap().as_ref() {
            Some(events) => events.send(event),
            None => false,
        }
    }

    pub fn notify(&self, value: &[u8]) -> bool {
        self.inject(LinkEvent::Notification {
            characteristic: NOTIFY_CHARACTERISTIC_UUID,
            value: value.to_vec(),
        })
    }
}

pub struct MockTransport {
    id: String,
    script: Script,
    recorder: Recorder,
}

impl MockTransport {
    pub fn new(id: &str, script: Script) -> (Self, Recorder) {
        let recorder = Recorder::default();
        let transport = Self {
            id: id.to_string(),
            script,
            recorder: recorder.clone(),
        };
        (transport, recorder)
    }

    fn record(&self, call: Call) {
        self.recorder.calls.lock().unwrap().push(call);
    }

    fn emit(&self, event: LinkEvent) {
        self.recorder.inject(event);
    }
}

impl Transport for MockTransport {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn attach(&mut self, events: LinkEvents) {
        *self.recorder.events.lock().unwrap() = Some(events);
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.record(Call::Connect);
        if self.script.connect_issue_fails {
            return Err(TransportError::Unsupported("connect"));
        }
        self.emit(LinkEvent::ConnectionChanged {
            status: self.script.connect,
            connected: self.script.connect.is_success(),
        });
        Ok(())
    }

    async fn discover_services(&mut self) -> Result<(), TransportError> {
        self.record(Call::DiscoverServices);
        self.emit(LinkEvent::ServicesDiscovered {
            status: Status::SUCCESS,
            services: self.script.services.clone(),
        });
        Ok(())
    }

    async fn enable_notifications(
        &mut self,
        _service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), TransportError> {
        self.record(Call::EnableNotifications(characteristic));
        if self.script.fail_subscribe {
            return Err(TransportError::Unsupported("subscribe"));
        }
        Ok(())
    }

    async fn write(
        &mut self,
        _service: Uuid,
        _characteristic: Uuid,
        data: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.record(Call::Write(data));
        if self.script.fail_writes {
            return Err(TransportError::Unsupported("write"));
        }
        Ok(())
    }

    fn supports_mtu_request(&self) -> bool {
        self.script.mtu_supported
    }

    async fn request_mtu(&mut self, mtu: u16) -> Result<(), TransportError> {
        self.record(Call::RequestMtu(mtu));
        if self.script.mtu_issue_fails {
            return Err(TransportError::Unsupported("mtu request"));
        }
        let (status, mtu) = self.script.mtu_result;
        self.emit(LinkEvent::MtuChanged { status, mtu });
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.record(Call::Disconnect);
        self.emit(LinkEvent::ConnectionChanged {
            status: Status::SUCCESS,
            connected: false,
        });
        Ok(())
    }

    async fn close(&mut self) {
        self.record(Call::Close);
        *self.recorder.events.lock().unwrap() = None;
    }
}

/// Handshake double: answers immediately with fixed results, or stays quiet
/// when a result is `None`.
///
/// Notifications: `corrupt` raises a protocol error, `ok` completes
/// configuration, anything else is passed through.
pub struct MockHandshake {
    security: Option<Status>,
    configure: Option<Status>,
    post_limit: Arc<Mutex<Option<usize>>>,
}

impl Handshake for MockHandshake {
    fn set_post_limit(&mut self, limit: usize) {
        *self.post_limit.lock().unwrap() = Some(limit);
    }

    fn negotiate_security(&mut self) -> Result<Vec<HandshakeOutput>, HandshakeError> {
        let mut out = vec![HandshakeOutput::Write(b"sec".to_vec())];
        if let Some(status) = self.security {
            out.push(HandshakeOutput::Event(HandshakeEvent::SecurityResult { status }));
        }
        Ok(out)
    }

    fn configure(
        &mut self,
        _params: &ConfigureParams,
    ) -> Result<Vec<HandshakeOutput>, HandshakeError> {
        let mut out = vec![HandshakeOutput::Write(b"cfg".to_vec())];
        if let Some(status) = self.configure {
            out.push(HandshakeOutput::Event(HandshakeEvent::ConfigureResult { status }));
        }
        Ok(out)
    }

    fn on_notification(&mut self, value: &[u8]) -> Vec<HandshakeOutput> {
        let event = match value {
            b"corrupt" => HandshakeEvent::Error {
                code: errors::MALFORMED_RESPONSE,
            },
            b"ok" => HandshakeEvent::ConfigureResult {
                status: Status::SUCCESS,
            },
            other => HandshakeEvent::Notification {
                pkg_type: 1,
                sub_type: 0,
                data: other.to_vec(),
            },
        };
        vec![HandshakeOutput::Event(event)]
    }
}

pub struct MockFactory {
    pub security: Option<Status>,
    pub configure: Option<Status>,
    pub post_limit: Arc<Mutex<Option<usize>>>,
    pub bindings: Arc<Mutex<Vec<ChannelBinding>>>,
}

impl MockFactory {
    pub fn new(security: Option<Status>, configure: Option<Status>) -> Self {
        Self {
            security,
            configure,
            post_limit: Arc::default(),
            bindings: Arc::default(),
        }
    }

    /// Answers both security and configuration with success
    pub fn happy() -> Self {
        Self::new(Some(Status::SUCCESS), Some(Status::SUCCESS))
    }
}

impl HandshakeFactory for MockFactory {
    type Client = MockHandshake;

    fn create(&self, binding: &ChannelBinding) -> MockHandshake {
        self.bindings.lock().unwrap().push(binding.clone());
        MockHandshake {
            security: self.security,
            configure: self.configure,
            post_limit: self.post_limit.clone(),
        }
    }
}

pub fn params() -> Arc<ConfigureParams> {
    Arc::new(ConfigureParams::station("home", "secret-password"))
}
