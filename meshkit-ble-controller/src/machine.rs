//! Provisioning state machine
//!
//! ```text
//! Disconnected → Connecting → Connected → DiscoveringService → ServiceFound
//!   → DiscoveringCharacteristics → CharacteristicsFound → NegotiatingMtu
//!   → SecurityHandshake → Configuring → Configured
//! ```
//!
//! `Failed` is reachable from every intermediate state and `Disconnected`
//! from every state. [`Machine::handle`] is the whole transition function:
//! it consumes one [`Event`] and returns the states it walked through, the
//! [`ProvisionEvent`]s to emit and the [`Action`]s the session must perform.
//! It does no I/O, so it can be driven directly in tests.

use meshkit_proto::Status;
use meshkit_proto::ble::{
    ATT_HEADER_LENGTH, DEFAULT_MTU_LENGTH, NOTIFY_CHARACTERISTIC_UUID, SERVICE_UUID,
    WRITE_CHARACTERISTIC_UUID,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::handshake::{ChannelBinding, HandshakeEvent};
use crate::link::{GattService, LinkEvent};
use crate::sink::{CharacteristicRole, ProvisionEvent, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    DiscoveringService,
    ServiceFound,
    DiscoveringCharacteristics,
    CharacteristicsFound,
    NegotiatingMtu,
    SecurityHandshake,
    Configuring,
    Configured,
    Failed,
}

impl SessionState {
    /// Position on the forward path. `Failed` is off the path.
    pub fn rank(self) -> Option<u8> {
        Some(match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::DiscoveringService => 3,
            Self::ServiceFound => 4,
            Self::DiscoveringCharacteristics => 5,
            Self::CharacteristicsFound => 6,
            Self::NegotiatingMtu => 7,
            Self::SecurityHandshake => 8,
            Self::Configuring => 9,
            Self::Configured => 10,
            Self::Failed => return None,
        })
    }

    /// Whether `from -> to` is a legal edge: strictly forward, or one of the
    /// teardown edges into `Failed` / `Disconnected`.
    pub fn is_legal_edge(from: SessionState, to: SessionState) -> bool {
        match (from, to) {
            (_, Self::Disconnected) => from != Self::Disconnected,
            (Self::Disconnected | Self::Failed, Self::Failed) => false,
            (_, Self::Failed) => true,
            (Self::Failed, _) => false,
            _ => matches!((from.rank(), to.rank()), (Some(a), Some(b)) if b > a),
        }
    }

    /// Provisioning finished, one way or the other
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Configured | Self::Failed)
    }

    /// Phase a failure in this state is attributed to
    pub fn step(self) -> Step {
        match self {
            Self::Disconnected | Self::Connecting => Step::Connect,
            Self::Connected | Self::DiscoveringService | Self::ServiceFound => {
                Step::ServiceDiscovery
            }
            Self::DiscoveringCharacteristics | Self::CharacteristicsFound => {
                Step::CharacteristicDiscovery
            }
            Self::NegotiatingMtu => Step::MtuNegotiation,
            Self::SecurityHandshake => Step::SecurityHandshake,
            Self::Configuring => Step::Configure,
            Self::Configured | Self::Failed => Step::Link,
        }
    }
}

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Begin connecting
    Start,
    Link(LinkEvent),
    Handshake(HandshakeEvent),
    /// The MTU request could not be issued
    MtuRequestFailed,
    /// A connect, notification subscription or write could not be issued.
    /// The link may be half open, so it is torn down through a disconnect.
    IssueFailed { status: Status },
    /// Caller asked to tear the session down
    Disconnect,
}

/// Side effects the session performs on behalf of the machine, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Connect,
    DiscoverServices,
    CreateClient(ChannelBinding),
    EnableNotifications(ChannelBinding),
    RequestMtu(u16),
    SetPostLimit(usize),
    NegotiateSecurity,
    Configure,
    /// Hand an inbound frame to the handshake client
    Feed(Vec<u8>),
    Disconnect,
    /// Drop the handshake client and close the transport
    Release,
}

/// GATT layout the engine looks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattProfile {
    pub service: Uuid,
    pub write: Uuid,
    pub notify: Uuid,
}

impl Default for GattProfile {
    fn default() -> Self {
        Self {
            service: SERVICE_UUID,
            write: WRITE_CHARACTERISTIC_UUID,
            notify: NOTIFY_CHARACTERISTIC_UUID,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub profile: GattProfile,
    /// MTU requested when the transport supports it
    pub mtu: u16,
    /// Protocol variant selector; negative means unspecified
    pub device_version: Option<i32>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            profile: GattProfile::default(),
            mtu: DEFAULT_MTU_LENGTH,
            device_version: None,
        }
    }
}

/// Result of handling one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    /// Every state entered, in order. Empty when the event was ignored.
    pub path: Vec<SessionState>,
    pub events: Vec<ProvisionEvent>,
    pub actions: Vec<Action>,
}

impl Transition {
    fn new(from: SessionState) -> Self {
        Self {
            from,
            path: Vec::new(),
            events: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn to(&self) -> SessionState {
        self.path.last().copied().unwrap_or(self.from)
    }
}

#[derive(Debug)]
pub struct Machine {
    state: SessionState,
    profile: GattProfile,
    mtu: u16,
    mtu_supported: bool,
    device_version: Option<i32>,
    binding: Option<ChannelBinding>,
    post_limit: Option<usize>,
    started: bool,
    closed: bool,
}

impl Machine {
    /// `mtu_supported` is the transport's capability flag, checked once here.
    pub fn new(options: &SessionOptions, mtu_supported: bool) -> Self {
        Self {
            state: SessionState::Disconnected,
            profile: options.profile,
            mtu: options.mtu,
            mtu_supported,
            device_version: options.device_version.filter(|v| *v >= 0),
            binding: None,
            post_limit: None,
            started: false,
            closed: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Set once the session reached `Disconnected` after starting. Terminal.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Negotiated post-package limit, `None` while the transport default applies
    pub fn post_limit(&self) -> Option<usize> {
        self.post_limit
    }

    pub fn handle(&mut self, event: Event) -> Transition {
        let mut t = Transition::new(self.state);
        if self.closed {
            debug!(?event, "session closed, dropping event");
            return t;
        }
        match event {
            Event::Start => self.on_start(&mut t),
            Event::Link(LinkEvent::ConnectionChanged { status, connected }) => {
                self.on_connection_changed(&mut t, status, connected)
            }
            Event::Link(LinkEvent::ServicesDiscovered { status, services }) => {
                self.on_services_discovered(&mut t, status, &services)
            }
            Event::Link(LinkEvent::MtuChanged { status, mtu }) => {
                self.on_mtu_changed(&mut t, status, mtu)
            }
            Event::Link(LinkEvent::Notification {
                characteristic,
                value,
            }) => self.on_notification(&mut t, characteristic, value),
            Event::Handshake(event) => self.on_handshake(&mut t, event),
            Event::MtuRequestFailed => {
                if self.state == SessionState::NegotiatingMtu {
                    warn!("mtu request could not be issued, keeping default limit");
                    self.negotiate_security(&mut t);
                }
            }
            Event::IssueFailed { status } => {
                if !self.is_failing() {
                    t.events.push(ProvisionEvent::Error {
                        code: status.0,
                        step: self.state.step(),
                    });
                    self.fail(&mut t);
                }
            }
            Event::Disconnect => self.on_disconnect_requested(&mut t),
        }
        t
    }

    fn enter(&mut self, t: &mut Transition, next: SessionState) {
        debug_assert!(
            SessionState::is_legal_edge(self.state, next),
            "illegal edge {:?} -> {next:?}",
            self.state
        );
        debug!(from = ?self.state, to = ?next, "session transition");
        self.state = next;
        t.path.push(next);
    }

    fn is_failing(&self) -> bool {
        matches!(self.state, SessionState::Failed | SessionState::Disconnected)
    }

    /// Terminal failure of the current attempt: disconnect and wait for the
    /// link to report the close.
    fn fail(&mut self, t: &mut Transition) {
        if self.state != SessionState::Failed {
            self.enter(t, SessionState::Failed);
        }
        t.actions.push(Action::Disconnect);
    }

    fn teardown(&mut self, t: &mut Transition, status: Status) {
        t.events.push(ProvisionEvent::ConnectionChanged {
            status,
            connected: false,
        });
        if self.state != SessionState::Disconnected {
            self.enter(t, SessionState::Disconnected);
        }
        t.actions.push(Action::Release);
        t.events.push(ProvisionEvent::SessionClosed);
        self.binding = None;
        self.closed = true;
    }

    fn on_start(&mut self, t: &mut Transition) {
        if self.started {
            return;
        }
        self.started = true;
        self.enter(t, SessionState::Connecting);
        t.actions.push(Action::Connect);
    }

    fn on_connection_changed(&mut self, t: &mut Transition, status: Status, connected: bool) {
        if connected && status.is_success() {
            if self.state != SessionState::Connecting {
                debug!(state = ?self.state, "duplicate connect event ignored");
                return;
            }
            t.events.push(ProvisionEvent::ConnectionChanged {
                status,
                connected: true,
            });
            self.enter(t, SessionState::Connected);
            self.enter(t, SessionState::DiscoveringService);
            t.actions.push(Action::DiscoverServices);
            return;
        }

        if !self.started {
            debug!("link event before start ignored");
            return;
        }
        if connected {
            // link reports trouble but is still up
            t.actions.push(Action::Disconnect);
        }
        self.teardown(t, status);
    }

    fn on_services_discovered(
        &mut self,
        t: &mut Transition,
        status: Status,
        services: &[GattService],
    ) {
        if self.state != SessionState::DiscoveringService {
            debug!(state = ?self.state, "unexpected service discovery result ignored");
            return;
        }
        let profile = self.profile;

        let service = services.iter().find(|s| s.uuid == profile.service);
        let service = match (status.is_success(), service) {
            (true, Some(service)) => service,
            (ok, _) => {
                let status = if ok { Status::NOT_FOUND } else { status };
                warn!(%status, service = %profile.service, "provisioning service not found");
                t.events.push(ProvisionEvent::ServiceDiscovered {
                    status,
                    service: profile.service,
                });
                self.fail(t);
                return;
            }
        };
        t.events.push(ProvisionEvent::ServiceDiscovered {
            status: Status::SUCCESS,
            service: profile.service,
        });
        self.enter(t, SessionState::ServiceFound);
        self.enter(t, SessionState::DiscoveringCharacteristics);

        for (role, uuid) in [
            (CharacteristicRole::Write, profile.write),
            (CharacteristicRole::Notify, profile.notify),
        ] {
            let status = if service.characteristics.contains(&uuid) {
                Status::SUCCESS
            } else {
                Status::NOT_FOUND
            };
            t.events.push(ProvisionEvent::CharacteristicDiscovered {
                status,
                role,
                characteristic: uuid,
            });
            if !status.is_success() {
                warn!(?role, characteristic = %uuid, "characteristic not found");
                self.fail(t);
                return;
            }
        }
        self.enter(t, SessionState::CharacteristicsFound);

        let binding = ChannelBinding {
            service: profile.service,
            write: profile.write,
            notify: profile.notify,
            device_version: self.device_version,
        };
        self.binding = Some(binding.clone());
        t.actions.push(Action::CreateClient(binding.clone()));
        t.actions.push(Action::EnableNotifications(binding));

        if self.mtu_supported {
            self.enter(t, SessionState::NegotiatingMtu);
            t.actions.push(Action::RequestMtu(self.mtu));
        } else {
            debug!("transport cannot request mtu, keeping default limit");
            self.negotiate_security(t);
        }
    }

    fn on_mtu_changed(&mut self, t: &mut Transition, status: Status, mtu: u16) {
        if self.state != SessionState::NegotiatingMtu {
            debug!(state = ?self.state, mtu, "unexpected mtu change ignored");
            return;
        }
        if status.is_success() {
            let limit = usize::from(mtu.saturating_sub(ATT_HEADER_LENGTH));
            self.post_limit = Some(limit);
            t.actions.push(Action::SetPostLimit(limit));
        } else {
            warn!(%status, mtu, "mtu negotiation failed, keeping default limit");
        }
        t.events.push(ProvisionEvent::MtuChanged { status, mtu });
        self.negotiate_security(t);
    }

    fn negotiate_security(&mut self, t: &mut Transition) {
        self.enter(t, SessionState::SecurityHandshake);
        t.actions.push(Action::NegotiateSecurity);
    }

    fn on_notification(&mut self, t: &mut Transition, characteristic: Uuid, value: Vec<u8>) {
        let Some(binding) = &self.binding else {
            debug!(%characteristic, "notification before client exists ignored");
            return;
        };
        if characteristic != binding.notify || self.state == SessionState::Failed {
            return;
        }
        t.actions.push(Action::Feed(value));
    }

    fn on_handshake(&mut self, t: &mut Transition, event: HandshakeEvent) {
        if self.binding.is_none() {
            debug!(?event, "handshake event without client ignored");
            return;
        }
        match event {
            HandshakeEvent::SecurityResult { status } => {
                if self.state != SessionState::SecurityHandshake {
                    return;
                }
                t.events.push(ProvisionEvent::SecurityResult { status });
                if status.is_success() {
                    self.enter(t, SessionState::Configuring);
                    t.actions.push(Action::Configure);
                } else {
                    self.fail(t);
                }
            }
            HandshakeEvent::ConfigureResult { status } => {
                if self.state != SessionState::Configuring {
                    return;
                }
                t.events.push(ProvisionEvent::ConfigureResult { status });
                if status.is_success() {
                    self.enter(t, SessionState::Configured);
                } else {
                    self.fail(t);
                }
            }
            HandshakeEvent::Notification {
                pkg_type,
                sub_type,
                data,
            } => t.events.push(ProvisionEvent::Notification {
                pkg_type,
                sub_type,
                data,
            }),
            HandshakeEvent::Error { code } => {
                warn!(code, state = ?self.state, "protocol error, disconnecting");
                t.events.push(ProvisionEvent::Error {
                    code,
                    step: self.state.step(),
                });
                if self.state != SessionState::Failed {
                    self.fail(t);
                }
            }
        }
    }

    fn on_disconnect_requested(&mut self, t: &mut Transition) {
        if !self.started {
            // never connected, but the transport still gets its close
            self.started = true;
            self.closed = true;
            t.actions.push(Action::Release);
            t.events.push(ProvisionEvent::SessionClosed);
            return;
        }
        t.actions.push(Action::Disconnect);
        self.teardown(t, Status::SUCCESS);
    }
}
