//! Session: drives one device's provisioning over one connection
//!
//! Each session is a spawned task draining its own event queue, so events for
//! one session are handled strictly one after another while independent
//! sessions run in parallel without sharing anything.

use std::ops::ControlFlow;
use std::sync::Arc;

use meshkit_proto::Status;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{Instrument, debug, info_span, warn};

use crate::handshake::{
    ChannelBinding, Handshake, HandshakeError, HandshakeEvent, HandshakeFactory, HandshakeOutput,
};
use crate::link::{LinkEvent, LinkEvents, Transport};
use crate::machine::{Action, Event, Machine, SessionOptions, SessionState};
use crate::params::ConfigureParams;
use crate::sink::EventSink;

/// What a finished session went through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub device: String,
    pub state: SessionState,
    /// Every state entered, in order
    pub visited: Vec<SessionState>,
    pub post_limit: Option<usize>,
}

/// Caller side of a running session
#[derive(Debug)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Event>,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<SessionReport>,
}

impl SessionHandle {
    /// Tear the session down from whatever state it is in.
    /// Returns `false` if the session already finished.
    pub fn disconnect(&self) -> bool {
        self.tx.send(Event::Disconnect).is_ok()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Wait until the session enters a state matching `f`, or ends.
    pub async fn wait_for(&mut self, f: impl Fn(SessionState) -> bool) -> SessionState {
        let reached = self.state.wait_for(|s| f(*s)).await.map(|s| *s);
        reached.unwrap_or_else(|_| *self.state.borrow())
    }

    /// Wait for the session to reach `Disconnected` and return its report.
    pub async fn join(self) -> Result<SessionReport, JoinError> {
        self.task.await
    }
}

pub struct Session<T: Transport, F: HandshakeFactory, S: EventSink> {
    device: String,
    machine: Machine,
    transport: T,
    factory: F,
    client: Option<F::Client>,
    binding: Option<ChannelBinding>,
    params: Arc<ConfigureParams>,
    sink: S,
    tx: mpsc::UnboundedSender<Event>,
    rx: mpsc::UnboundedReceiver<Event>,
    state: watch::Sender<SessionState>,
    visited: Vec<SessionState>,
}

impl<T: Transport, F: HandshakeFactory, S: EventSink> Session<T, F, S> {
    /// Start provisioning over `transport` and return immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        transport: T,
        factory: F,
        params: Arc<ConfigureParams>,
        sink: S,
        options: SessionOptions,
    ) -> SessionHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let machine = Machine::new(&options, transport.supports_mtu_request());
        let (state, state_rx) = watch::channel(machine.state());
        let device = transport.id();
        let span = info_span!("session", %device);

        let session = Session {
            device,
            machine,
            transport,
            factory,
            client: None,
            binding: None,
            params,
            sink,
            tx: tx.clone(),
            rx,
            state,
            visited: Vec::new(),
        };
        let task = tokio::spawn(session.run().instrument(span));

        SessionHandle {
            tx,
            state: state_rx,
            task,
        }
    }

    async fn run(mut self) -> SessionReport {
        self.transport.attach(LinkEvents::new(self.tx.clone()));
        self.queue(Event::Start);

        while let Some(event) = self.rx.recv().await {
            self.step(event).await;
            if self.machine.is_closed() {
                break;
            }
        }

        SessionReport {
            device: self.device,
            state: self.machine.state(),
            visited: self.visited,
            post_limit: self.machine.post_limit(),
        }
    }

    fn queue(&self, event: Event) {
        // the receiver lives in `self`, so this cannot fail while we run
        let _ = self.tx.send(event);
    }

    async fn step(&mut self, event: Event) {
        let transition = self.machine.handle(event);
        for event in &transition.events {
            self.sink.emit(event);
        }
        if !transition.path.is_empty() {
            self.visited.extend_from_slice(&transition.path);
            self.state.send_replace(transition.to());
        }
        for action in transition.actions {
            // the rest of the transition assumed this action went through
            if self.execute(action).await.is_break() {
                break;
            }
        }
    }

    /// Breaks when the action could not be issued and an `IssueFailed` or
    /// handshake error is queued instead.
    async fn execute(&mut self, action: Action) -> ControlFlow<()> {
        debug!(?action, "executing");
        match action {
            Action::Connect => {
                if let Err(e) = self.transport.connect().await {
                    warn!(error = %e, "connect could not be issued");
                    return self.issue_failed();
                }
            }
            Action::DiscoverServices => {
                if let Err(e) = self.transport.discover_services().await {
                    warn!(error = %e, "service discovery could not be issued");
                    self.queue(Event::Link(LinkEvent::ServicesDiscovered {
                        status: Status::FAILURE,
                        services: Vec::new(),
                    }));
                }
            }
            Action::CreateClient(binding) => {
                self.client = Some(self.factory.create(&binding));
                self.binding = Some(binding);
            }
            Action::EnableNotifications(binding) => {
                if let Err(e) = self
                    .transport
                    .enable_notifications(binding.service, binding.notify)
                    .await
                {
                    warn!(error = %e, "enabling notifications failed");
                    return self.issue_failed();
                }
            }
            Action::RequestMtu(mtu) => {
                if let Err(e) = self.transport.request_mtu(mtu).await {
                    warn!(error = %e, mtu, "mtu request could not be issued");
                    self.queue(Event::MtuRequestFailed);
                }
            }
            Action::SetPostLimit(limit) => {
                if let Some(client) = self.client.as_mut() {
                    client.set_post_limit(limit);
                }
            }
            Action::NegotiateSecurity => {
                let Some(client) = self.client.as_mut() else {
                    return ControlFlow::Continue(());
                };
                let result = client.negotiate_security();
                return self.apply(result).await;
            }
            Action::Configure => {
                let Some(client) = self.client.as_mut() else {
                    return ControlFlow::Continue(());
                };
                let result = client.configure(&self.params);
                return self.apply(result).await;
            }
            Action::Feed(value) => {
                let Some(client) = self.client.as_mut() else {
                    return ControlFlow::Continue(());
                };
                let outputs = client.on_notification(&value);
                return self.apply(Ok(outputs)).await;
            }
            Action::Disconnect => {
                if let Err(e) = self.transport.disconnect().await {
                    warn!(error = %e, "disconnect failed, closing locally");
                    self.queue(Event::Link(LinkEvent::ConnectionChanged {
                        status: Status::FAILURE,
                        connected: false,
                    }));
                }
            }
            Action::Release => {
                self.client = None;
                self.binding = None;
                self.transport.close().await;
            }
        }
        ControlFlow::Continue(())
    }

    fn issue_failed(&self) -> ControlFlow<()> {
        self.queue(Event::IssueFailed {
            status: Status::FAILURE,
        });
        ControlFlow::Break(())
    }

    async fn apply(
        &mut self,
        result: Result<Vec<HandshakeOutput>, HandshakeError>,
    ) -> ControlFlow<()> {
        let outputs = match result {
            Ok(outputs) => outputs,
            Err(e) => {
                warn!(error = %e, "handshake request refused");
                self.queue(Event::Handshake(HandshakeEvent::Error { code: e.code() }));
                return ControlFlow::Break(());
            }
        };
        for output in outputs {
            match output {
                HandshakeOutput::Write(frame) => {
                    let Some((service, write)) = self.binding.as_ref().map(|b| (b.service, b.write))
                    else {
                        continue;
                    };
                    if let Err(e) = self.transport.write(service, write, frame).await {
                        warn!(error = %e, "write failed");
                        return self.issue_failed();
                    }
                }
                HandshakeOutput::Event(event) => self.queue(Event::Handshake(event)),
            }
        }
        ControlFlow::Continue(())
    }
}
