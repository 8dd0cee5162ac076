//! btleplug backed transport, plus scanning for provisionable mesh nodes

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use meshkit_proto::Status;
use meshkit_proto::ble::{DEVICE_NAME_PREFIX, SERVICE_UUID};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::link::{GattService, LinkEvent, LinkEvents, Transport, TransportError};

/// A peripheral seen during a scan
#[derive(Debug, Clone)]
pub struct MeshDevice {
    pub name: String,
    pub address: String,
    pub rssi: Option<i16>,
    /// Advertises the provisioning service or carries the mesh name prefix
    pub is_mesh: bool,
}

/// Get the default Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter, TransportError> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters.into_iter().next().ok_or(TransportError::NoAdapter)
}

fn is_mesh(name: &str, services: &[Uuid]) -> bool {
    name.starts_with(DEVICE_NAME_PREFIX) || services.contains(&SERVICE_UUID)
}

/// Scan for BLE devices
///
/// Returns every peripheral seen; mesh nodes have `is_mesh = true`.
pub async fn scan(adapter: &Adapter, duration: Duration) -> Result<Vec<MeshDevice>, TransportError> {
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(duration).await;

    let peripherals = adapter.peripherals().await?;
    let mut devices = Vec::new();

    for peripheral in peripherals {
        if let Some(props) = peripheral.properties().await? {
            let name = props.local_name.unwrap_or_else(|| "Unknown".to_string());
            let address = peripheral.address().to_string();
            let is_mesh = is_mesh(&name, &props.services);
            devices.push(MeshDevice {
                name,
                address,
                rssi: props.rssi,
                is_mesh,
            });
        }
    }

    adapter.stop_scan().await?;
    Ok(devices)
}

/// Find a device by name/address pattern, or the first mesh node seen
pub async fn find_device(
    adapter: &Adapter,
    target: Option<&str>,
    duration: Duration,
) -> Result<Peripheral, TransportError> {
    adapter.start_scan(ScanFilter::default()).await?;
    tokio::time::sleep(duration).await;

    let peripherals = adapter.peripherals().await?;

    for peripheral in peripherals {
        if let Some(props) = peripheral.properties().await? {
            let name = props.local_name.unwrap_or_default();
            let addr = peripheral.address().to_string();

            let matches = match target {
                Some(t) => name.contains(t) || addr.contains(t),
                None => is_mesh(&name, &props.services),
            };

            if matches {
                adapter.stop_scan().await?;
                debug!(%name, %addr, "found device");
                return Ok(peripheral);
            }
        }
    }

    adapter.stop_scan().await?;
    Err(TransportError::DeviceNotFound(target.map(str::to_string)))
}

/// [`Transport`] over a btleplug peripheral.
///
/// btleplug leaves MTU negotiation to the platform, so this transport reports
/// no MTU request capability and sessions keep the default post limit.
pub struct BleTransport {
    adapter: Adapter,
    peripheral: Peripheral,
    events: Option<LinkEvents>,
    watchers: Vec<JoinHandle<()>>,
}

impl BleTransport {
    pub fn new(adapter: Adapter, peripheral: Peripheral) -> Self {
        Self {
            adapter,
            peripheral,
            events: None,
            watchers: Vec::new(),
        }
    }

    fn emit(&self, event: LinkEvent) {
        if let Some(events) = &self.events {
            events.send(event);
        }
    }

    fn characteristic(&self, service: Uuid, uuid: Uuid) -> Result<Characteristic, TransportError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid && c.service_uuid == service)
            .ok_or(TransportError::CharacteristicNotFound(uuid))
    }

    /// Forward notifications and the peripheral's disconnect to the session.
    async fn watch(&mut self) -> Result<(), TransportError> {
        let events = self.events.clone().ok_or(TransportError::NotAttached)?;

        let mut notifications = self.peripheral.notifications().await?;
        let tx = events.clone();
        self.watchers.push(tokio::spawn(async move {
            while let Some(n) = notifications.next().await {
                let event = LinkEvent::Notification {
                    characteristic: n.uuid,
                    value: n.value,
                };
                if !tx.send(event) {
                    break;
                }
            }
        }));

        let mut central = self.adapter.events().await?;
        let id = self.peripheral.id();
        self.watchers.push(tokio::spawn(async move {
            while let Some(event) = central.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event {
                    if gone == id {
                        events.send(LinkEvent::ConnectionChanged {
                            status: Status::SUCCESS,
                            connected: false,
                        });
                        break;
                    }
                }
            }
        }));
        Ok(())
    }
}

impl Transport for BleTransport {
    fn id(&self) -> String {
        self.peripheral.address().to_string()
    }

    fn attach(&mut self, events: LinkEvents) {
        self.events = Some(events);
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        if let Err(e) = self.peripheral.connect().await {
            warn!(error = %e, "connect failed");
            self.emit(LinkEvent::ConnectionChanged {
                status: Status::FAILURE,
                connected: false,
            });
            return Ok(());
        }
        self.watch().await?;
        self.emit(LinkEvent::ConnectionChanged {
            status: Status::SUCCESS,
            connected: true,
        });
        Ok(())
    }

    async fn discover_services(&mut self) -> Result<(), TransportError> {
        let event = match self.peripheral.discover_services().await {
            Ok(()) => LinkEvent::ServicesDiscovered {
                status: Status::SUCCESS,
                services: self
                    .peripheral
                    .services()
                    .into_iter()
                    .map(|s| GattService {
                        uuid: s.uuid,
                        characteristics: s.characteristics.into_iter().map(|c| c.uuid).collect(),
                    })
                    .collect(),
            },
            Err(e) => {
                warn!(error = %e, "service discovery failed");
                LinkEvent::ServicesDiscovered {
                    status: Status::FAILURE,
                    services: Vec::new(),
                }
            }
        };
        self.emit(event);
        Ok(())
    }

    async fn enable_notifications(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), TransportError> {
        let c = self.characteristic(service, characteristic)?;
        self.peripheral.subscribe(&c).await?;
        Ok(())
    }

    async fn write(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        data: Vec<u8>,
    ) -> Result<(), TransportError> {
        let c = self.characteristic(service, characteristic)?;
        self.peripheral
            .write(&c, &data, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    fn supports_mtu_request(&self) -> bool {
        false
    }

    async fn request_mtu(&mut self, _mtu: u16) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("mtu request"))
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.peripheral.disconnect().await?;
        // the central event may never arrive once we stop listening
        self.emit(LinkEvent::ConnectionChanged {
            status: Status::SUCCESS,
            connected: false,
        });
        Ok(())
    }

    async fn close(&mut self) {
        for watcher in self.watchers.drain(..) {
            watcher.abort();
        }
        self.events = None;
    }
}
