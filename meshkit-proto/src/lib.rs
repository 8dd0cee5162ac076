//! Meshkit wire protocol - GATT profile constants and local command envelopes

pub mod ble;
pub mod local;

pub use ble::Status;
pub use local::{RequestEnvelope, ResponseBody};
