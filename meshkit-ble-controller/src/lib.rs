//! meshkit BLE controller
//!
//! Provisions mesh nodes over BLE. A [`Session`] owns one connection and
//! walks it through connect, discovery, MTU negotiation, the security
//! handshake and configuration, reporting each milestone to an
//! [`EventSink`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use meshkit_ble_controller::{ble, BleTransport, ConfigureParams, LogSink};
//! use meshkit_ble_controller::{PlainChannelFactory, Session, SessionOptions, SessionState};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = ble::get_adapter().await?;
//!     let peripheral = ble::find_device(&adapter, None, Duration::from_secs(5)).await?;
//!     let transport = BleTransport::new(adapter, peripheral);
//!
//!     let params = Arc::new(ConfigureParams::station("MySSID", "MyPassword"));
//!     let mut session = Session::spawn(
//!         transport,
//!         PlainChannelFactory,
//!         params,
//!         LogSink::new("node"),
//!         SessionOptions::default(),
//!     );
//!     session.wait_for(SessionState::is_settled).await;
//!     session.disconnect();
//!     let report = session.join().await?;
//!     println!("{:?}", report.visited);
//!     Ok(())
//! }
//! ```

pub mod ble;
pub mod handshake;
pub mod link;
pub mod machine;
pub mod params;
pub mod plain;
pub mod session;
pub mod sink;

pub use ble::{BleTransport, MeshDevice};
pub use handshake::{ChannelBinding, Handshake, HandshakeEvent, HandshakeFactory, HandshakeOutput};
pub use link::{LinkEvent, LinkEvents, Transport, TransportError};
pub use machine::{Machine, SessionOptions, SessionState};
pub use params::{ConfigureParams, OpMode};
pub use plain::{PlainChannel, PlainChannelFactory};
pub use session::{Session, SessionHandle, SessionReport};
pub use sink::{EventSink, LogSink, ProvisionEvent, Step};
