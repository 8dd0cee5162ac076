//! Configuration delivered to the device once the secure channel is up

use serde::{Deserialize, Serialize};

/// WiFi operating mode the device should switch to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpMode {
    Null,
    #[default]
    Station,
    SoftAp,
    StationSoftAp,
}

impl OpMode {
    fn has_station(self) -> bool {
        matches!(self, Self::Station | Self::StationSoftAp)
    }
}

/// Network credentials and mesh settings for one provisioning session.
///
/// Owned by the caller and shared with the session behind an `Arc`; it is
/// never modified once the session has started.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigureParams {
    #[serde(default)]
    pub op_mode: OpMode,
    #[serde(default)]
    pub sta_ssid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sta_bssid: Option<String>,
    #[serde(default)]
    pub sta_password: String,
    /// Six byte mesh id, hex encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh_password: Option<String>,
    /// Node MACs allowed to join the mesh
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub whitelist: Vec<String>,
    /// Opaque device specific settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<serde_json::Value>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParamsError {
    #[error("station mode requires an SSID")]
    MissingSsid,
    #[error("SSID is longer than 32 bytes")]
    SsidTooLong,
    #[error("password is longer than 64 bytes")]
    PasswordTooLong,
    #[error("mesh id must be 12 hex digits, got {0:?}")]
    InvalidMeshId(String),
}

impl ConfigureParams {
    /// Station mode parameters for the given network
    pub fn station(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            op_mode: OpMode::Station,
            sta_ssid: ssid.into(),
            sta_password: password.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.op_mode.has_station() {
            if self.sta_ssid.is_empty() {
                return Err(ParamsError::MissingSsid);
            }
            if self.sta_ssid.len() > 32 {
                return Err(ParamsError::SsidTooLong);
            }
            if self.sta_password.len() > 64 {
                return Err(ParamsError::PasswordTooLong);
            }
        }
        if let Some(id) = &self.mesh_id {
            if id.len() != 12 || !id.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(ParamsError::InvalidMeshId(id.clone()));
            }
        }
        Ok(())
    }
}
