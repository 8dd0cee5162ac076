use std::path::{Path, PathBuf};
use std::time::Duration;

use meshkit_ble_controller::SessionOptions;
use meshkit_local::DispatchOptions;
use meshkit_proto::ble::DEFAULT_MTU_LENGTH;
use meshkit_proto::local::DEFAULT_PORT;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "config.json";

/// `$MESHKIT_HOME/config.json`. Every field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// User token sent with local requests
    pub token: Option<String>,
    pub port: u16,
    pub try_count: u32,
    pub retry_delay_ms: u64,
    pub timeout_ms: u64,
    pub mtu: u16,
    pub mesh_version: Option<i32>,
    pub scan_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token: None,
            port: DEFAULT_PORT,
            try_count: 3,
            retry_delay_ms: 1000,
            timeout_ms: 5000,
            mtu: DEFAULT_MTU_LENGTH,
            mesh_version: None,
            scan_secs: 5,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine home directory, set MESHKIT_HOME")]
    NoHome,
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// `MESHKIT_HOME`, or `~/.meshkit`
pub fn meshkit_home() -> Result<PathBuf, ConfigError> {
    if let Ok(home) = std::env::var("MESHKIT_HOME") {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir()
        .map(|h| h.join(".meshkit"))
        .ok_or(ConfigError::NoHome)
}

impl Config {
    /// Missing file means defaults.
    pub fn load(home: &Path) -> Result<Self, ConfigError> {
        let path = home.join(CONFIG_FILE);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => return Err(ConfigError::Io { path, source }),
        };
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.scan_secs)
    }

    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            port: self.port,
            token: self.token.clone(),
            try_count: self.try_count,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            mtu: self.mtu,
            device_version: self.mesh_version,
            ..SessionOptions::default()
        }
    }
}
