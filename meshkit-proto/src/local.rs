//! Local (LAN) command wire format
//!
//! Commands are posted as JSON to the mesh gateway, e.g.
//! `{"request":"add_device","whitelist":["aabbccddeeff"]}` or
//! `{"request":"reset","delay":0}`. The gateway answers with a JSON object
//! carrying at least `status_code`.

use serde::{Deserialize, Serialize};

/// HTTP path every local command is posted to
pub const REQUEST_PATH: &str = "/device_request";

/// Default local HTTP port of a mesh node
pub const DEFAULT_PORT: u16 = 80;

/// Comma separated MACs of the nodes the request targets
pub const HEADER_NODE_MAC: &str = "meshNodeMac";

/// Number of MACs in [`HEADER_NODE_MAC`]
pub const HEADER_NODE_COUNT: &str = "meshNodeNum";

/// Ask the gateway to answer once on behalf of every targeted node
pub const HEADER_ROOT_RESPONSE: &str = "rootResponse";

/// User authorization token
pub const HEADER_TOKEN: &str = "token";

/// Application level success value of [`ResponseBody::status_code`]
pub const STATUS_CODE_SUCCESS: i32 = 0;

/// One administrative command, serialized as the request body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum RequestEnvelope {
    /// Add member MACs to the mesh whitelist
    #[serde(rename = "add_device")]
    AddWhitelist { whitelist: Vec<String> },
    /// Factory reset after `delay` seconds
    Reset { delay: u32 },
}

impl RequestEnvelope {
    pub fn add_whitelist<I, S>(macs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AddWhitelist {
            whitelist: macs.into_iter().map(Into::into).collect(),
        }
    }

    pub fn reset(delay: u32) -> Self {
        Self::Reset { delay }
    }

    /// Value of the `request` field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AddWhitelist { .. } => "add_device",
            Self::Reset { .. } => "reset",
        }
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// Device reply. Fields other than `status_code` are kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseBody {
    pub status_code: i32,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ResponseBody {
    pub fn from_slice(body: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(body)
    }

    pub fn is_success(&self) -> bool {
        self.status_code == STATUS_CODE_SUCCESS
    }
}
