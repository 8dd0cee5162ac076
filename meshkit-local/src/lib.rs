//! Local command dispatch for mesh devices
//!
//! Administrative commands (whitelist updates, factory resets) are posted as
//! JSON over plain HTTP to the device's LAN address. All members of one mesh
//! node share the gateway's address, so a whitelist update is a single request
//! answered by the root on behalf of the whole group.

pub mod device;
pub mod dispatch;
pub mod error;
pub mod retry;
pub mod transport;

pub use device::{Device, DeviceState, shared_host};
pub use dispatch::{CommandDispatcher, DispatchOptions};
pub use error::{DispatchError, TransportError};
pub use retry::{RetryPolicy, send_with_retry};
pub use transport::{HttpTransport, LocalRequest, LocalResponse, LocalTransport};
