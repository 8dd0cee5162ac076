//! BLE GATT profile and status constants for mesh device provisioning
//!
//! A provisionable node exposes one service with two characteristics: the
//! phone writes frames to `WRITE_CHARACTERISTIC_UUID` and the node answers
//! through notifications on `NOTIFY_CHARACTERISTIC_UUID`.

use uuid::Uuid;

/// Provisioning service UUID: 0000ffff-0000-1000-8000-00805f9b34fb
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000ffff_0000_1000_8000_00805f9b34fb);

/// Outbound characteristic (phone -> device, write)
pub const WRITE_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x0000ff01_0000_1000_8000_00805f9b34fb);

/// Inbound characteristic (device -> phone, notify)
pub const NOTIFY_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x0000ff02_0000_1000_8000_00805f9b34fb);

/// MTU requested after characteristic discovery
pub const DEFAULT_MTU_LENGTH: u16 = 128;

/// ATT header bytes that do not count towards a write payload
pub const ATT_HEADER_LENGTH: u16 = 3;

/// Advertised name prefix of unprovisioned mesh nodes
pub const DEVICE_NAME_PREFIX: &str = "MESH_";

/// Status code carried by every provisioning callback.
///
/// Values follow the radio stack convention: `0` is success, anything else
/// is a failure. `NOT_FOUND` is reserved for discovery misses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub i32);

impl Status {
    pub const SUCCESS: Status = Status(0);
    pub const NOT_FOUND: Status = Status(-1);
    /// Generic link failure, same value as the radio stack's GATT_FAILURE
    pub const FAILURE: Status = Status(0x101);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::SUCCESS => write!(f, "success"),
            Self::NOT_FOUND => write!(f, "not found"),
            Status(code) => write!(f, "status {code}"),
        }
    }
}

/// Error codes raised by the handshake collaborator on its out-of-band channel
pub mod errors {
    /// Reply could not be parsed
    pub const MALFORMED_RESPONSE: i32 = -1000;
    /// Frame checksum did not match
    pub const CHECKSUM: i32 = -1001;
    /// Frame sequence number skipped or repeated
    pub const SEQUENCE: i32 = -1002;
    /// Write was refused by the collaborator before reaching the link
    pub const WRITE_REFUSED: i32 = -1003;
}
