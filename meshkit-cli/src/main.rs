//! Provisioning and management tool for mesh devices
//!
//! Provisions nodes over BLE and sends whitelist / reset commands to
//! provisioned nodes over the local network.

mod config;
mod logging;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use meshkit_ble_controller::{
    BleTransport, ConfigureParams, LogSink, PlainChannelFactory, Session, SessionState, Transport,
    ble,
};
use meshkit_local::{CommandDispatcher, Device, HttpTransport};
use tracing::{debug, info};

use crate::config::Config;

/// Upper bound on one provisioning run, from connect to configured
const PROVISION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "meshkit")]
#[command(about = "Provision and manage mesh devices")]
struct Cli {
    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for mesh devices
    Scan {
        /// Scan duration in seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },
    /// Send network configuration to a device over BLE
    Provision {
        /// Device name or address to connect to (default: first mesh node seen)
        #[arg(short, long)]
        device: Option<String>,
        #[arg(long, requires = "password")]
        ssid: Option<String>,
        #[arg(long, requires = "ssid")]
        password: Option<String>,
        /// WiFi credentials file (SSID on line 1, password on line 2)
        #[arg(short, long, conflicts_with = "ssid")]
        file: Option<PathBuf>,
        /// Full configuration parameters as JSON
        #[arg(long)]
        params: Option<PathBuf>,
        /// Protocol variant selector handed to the device
        #[arg(long)]
        mesh_version: Option<i32>,
    },
    /// Add nodes to the whitelist of the mesh behind a gateway
    Whitelist {
        /// LAN address of the gateway
        #[arg(long)]
        host: String,
        /// MAC of a node reachable through the gateway
        #[arg(long = "node", required = true)]
        nodes: Vec<String>,
        /// MAC to add to the whitelist
        #[arg(long = "add", required = true)]
        add: Vec<String>,
    },
    /// Factory reset devices over the local network
    Reset {
        /// Device as MAC@HOST; repeat to reset several in the background
        #[arg(long = "device", required = true, value_parser = parse_device)]
        devices: Vec<Device>,
        /// Seconds the device waits before resetting
        #[arg(long, default_value = "0")]
        delay: u32,
    },
}

fn parse_device(s: &str) -> Result<Device, String> {
    match s.split_once('@') {
        Some((mac, host)) if !mac.is_empty() && !host.is_empty() => Ok(Device::local(mac, host)),
        _ => Err(format!("expected MAC@HOST, got {s:?}")),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let home = config::meshkit_home()?;
    let config = Config::load(&home)?;
    debug!(home = %home.display(), ?config, "loaded config");

    match cli.command {
        Commands::Scan { duration } => {
            let duration = duration.map_or(config.scan_duration(), Duration::from_secs);
            scan_devices(duration).await?;
        }
        Commands::Provision {
            device,
            ssid,
            password,
            file,
            params,
            mesh_version,
        } => {
            let mut params = match params {
                Some(path) => read_params(&path)?,
                None => ConfigureParams::default(),
            };
            let credentials = match (ssid, password, file) {
                (Some(ssid), Some(password), _) => Some((ssid, password)),
                (_, _, Some(file)) => Some(read_wifi_credentials(&file)?),
                _ => None,
            };
            if let Some((ssid, password)) = credentials {
                params.sta_ssid = ssid;
                params.sta_password = password;
            }
            params.validate()?;

            let mut config = config;
            if mesh_version.is_some() {
                config.mesh_version = mesh_version;
            }
            provision_device(&config, device.as_deref(), params).await?;
        }
        Commands::Whitelist { host, nodes, add } => {
            let devices: Vec<Device> = nodes.iter().map(|mac| Device::local(mac, &host)).collect();
            let dispatcher = dispatcher(&config);
            if !dispatcher.add_whitelist(&devices, &add).await? {
                return Err(format!("gateway {host} did not accept the whitelist").into());
            }
            println!("Added {} node(s) to the whitelist via {host}", add.len());
        }
        Commands::Reset { mut devices, delay } => {
            let dispatcher = dispatcher(&config);
            if let [device] = devices.as_mut_slice() {
                if !dispatcher.reset(device, delay).await? {
                    return Err(format!("device {} did not confirm the reset", device.mac).into());
                }
                println!("Reset {}", device.mac);
            } else {
                let count = devices.len();
                for task in dispatcher.reset_all(devices, delay) {
                    task.await?;
                }
                println!("Reset sent to {count} devices");
            }
        }
    }

    Ok(())
}

fn dispatcher(config: &Config) -> CommandDispatcher<HttpTransport> {
    CommandDispatcher::new(
        Arc::new(HttpTransport::new(config.timeout())),
        config.dispatch_options(),
    )
}

fn read_wifi_credentials(file: &Path) -> Result<(String, String), Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(file)?;
    let mut lines = content.lines();
    let ssid = lines.next().ok_or("Missing SSID in credentials file")?.trim().to_string();
    let password = lines.next().ok_or("Missing password in credentials file")?.trim().to_string();
    Ok((ssid, password))
}

fn read_params(path: &Path) -> Result<ConfigureParams, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

async fn scan_devices(duration: Duration) -> Result<(), Box<dyn std::error::Error>> {
    println!("Scanning for mesh devices ({} seconds)...", duration.as_secs());

    let adapter = ble::get_adapter().await?;
    let devices = ble::scan(&adapter, duration).await?;

    println!("\nFound {} devices:", devices.len());
    for device in devices {
        let rssi = device
            .rssi
            .map(|r| format!("{r} dBm"))
            .unwrap_or_else(|| "N/A".to_string());
        let marker = if device.is_mesh { " [MESH]" } else { "" };
        println!("  {} ({}) RSSI: {rssi}{marker}", device.name, device.address);
    }
    Ok(())
}

async fn provision_device(
    config: &Config,
    target: Option<&str>,
    params: ConfigureParams,
) -> Result<(), Box<dyn std::error::Error>> {
    let adapter = ble::get_adapter().await?;
    let peripheral = ble::find_device(&adapter, target, config.scan_duration()).await?;
    let transport = BleTransport::new(adapter, peripheral);
    let address = transport.id();
    info!(%address, ssid = %params.sta_ssid, "provisioning");

    let mut session = Session::spawn(
        transport,
        PlainChannelFactory,
        Arc::new(params),
        LogSink::new(address.clone()),
        config.session_options(),
    );
    let settled =
        tokio::time::timeout(PROVISION_TIMEOUT, session.wait_for(SessionState::is_settled)).await;
    let state = settled.unwrap_or_else(|_| session.state());
    session.disconnect();
    let report = session.join().await?;
    debug!(visited = ?report.visited, "session finished");

    if state != SessionState::Configured {
        return Err(format!("provisioning {address} stopped in {state:?}").into());
    }
    println!("Provisioned {address}");
    Ok(())
}
