use crate::error::DispatchError;

/// What the app last knew about a device's reachability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceState {
    pub local: bool,
    pub cloud: bool,
}

impl DeviceState {
    pub fn is_empty(&self) -> bool {
        !self.local && !self.cloud
    }
}

/// A provisioned mesh node as seen from the LAN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub mac: String,
    /// Address of the gateway that answers for this node
    pub host: Option<String>,
    pub state: DeviceState,
}

impl Device {
    /// A device reachable on the local network
    pub fn local(mac: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            mac: mac.into(),
            host: Some(host.into()),
            state: DeviceState {
                local: true,
                cloud: false,
            },
        }
    }

    /// Forget everything cached about the device, e.g. after a reset
    pub fn clear_state(&mut self) {
        self.state = DeviceState::default();
    }
}

/// The single LAN address every device in the group is reachable through.
///
/// Fails if the group is empty, a device has no address, or two devices
/// resolve to different addresses.
pub fn shared_host(devices: &[Device]) -> Result<&str, DispatchError> {
    let (first, rest) = devices.split_first().ok_or(DispatchError::EmptyGroup)?;
    let host = first
        .host
        .as_deref()
        .ok_or_else(|| DispatchError::MissingAddress(first.mac.clone()))?;

    for device in rest {
        match device.host.as_deref() {
            None => return Err(DispatchError::MissingAddress(device.mac.clone())),
            Some(other) if other != host => {
                return Err(DispatchError::AddressMismatch {
                    expected: host.to_string(),
                    found: other.to_string(),
                    mac: device.mac.clone(),
                });
            }
            Some(_) => {}
        }
    }
    Ok(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_on_one_gateway() {
        let devices = [
            Device::local("aa", "10.0.0.5"),
            Device::local("bb", "10.0.0.5"),
            Device::local("cc", "10.0.0.5"),
        ];
        assert_eq!(shared_host(&devices).unwrap(), "10.0.0.5");
    }

    #[test]
    fn mismatched_addresses_are_rejected() {
        let devices = [Device::local("aa", "10.0.0.5"), Device::local("bb", "10.0.0.6")];
        match shared_host(&devices) {
            Err(DispatchError::AddressMismatch {
                expected,
                found,
                mac,
            }) => {
                assert_eq!(expected, "10.0.0.5");
                assert_eq!(found, "10.0.0.6");
                assert_eq!(mac, "bb");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_group_and_missing_address() {
        assert!(matches!(shared_host(&[]), Err(DispatchError::EmptyGroup)));

        let mut offline = Device::local("bb", "10.0.0.5");
        offline.host = None;
        let devices = [Device::local("aa", "10.0.0.5"), offline];
        assert!(matches!(
            shared_host(&devices),
            Err(DispatchError::MissingAddress(mac)) if mac == "bb"
        ));
    }

    #[test]
    fn clear_state_forgets_reachability() {
        let mut device = Device::local("aa", "10.0.0.5");
        assert!(!device.state.is_empty());
        device.clear_state();
        assert!(device.state.is_empty());
    }
}
