use std::time::Duration;

use anyhow::Result;
use bluer::{Adapter, AdapterEvent, Address, Device, Session};
use futures::StreamExt;
use tracing::{debug, info};

use super::gatt::BluerTransport;

/// Advertised name prefix of the earbuds.
pub const NAME_PREFIX: &str = "Fairbuds";

/// A discovered/paired Fairbuds entry.
///
/// The earbuds can show up as more than one entry; only one of them hosts
/// the EQ service, so callers try each in turn.
#[derive(Debug, Clone)]
pub struct BluetoothDevice {
    pub name: String,
    pub address: Address,
    pub paired: bool,
    pub connected: bool,
    device: Device,
}

impl BluetoothDevice {
    pub fn transport(&self) -> BluerTransport {
        BluerTransport::new(self.device.clone(), Some(self.name.clone()))
    }
}

/// Open the default adapter and power it on.
pub async fn default_adapter() -> Result<Adapter> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    Ok(adapter)
}

/// Run LE discovery for `duration`, then list every known Fairbuds entry.
pub async fn scan(adapter: &Adapter, duration: Duration) -> Result<Vec<BluetoothDevice>> {
    info!("Scanning for {:?}...", duration);
    {
        let discovery = adapter.discover_devices().await?;
        futures::pin_mut!(discovery);
        let _ = tokio::time::timeout(duration, async {
            while let Some(event) = discovery.next().await {
                if let AdapterEvent::DeviceAdded(addr) = event {
                    debug!("Discovered {}", addr);
                }
            }
        })
        .await;
    }
    list_devices(adapter).await
}

/// List devices BlueZ already knows about whose name matches the earbuds.
/// Connected and paired entries come first.
pub async fn list_devices(adapter: &Adapter) -> Result<Vec<BluetoothDevice>> {
    let mut result = Vec::new();

    for addr in adapter.device_addresses().await? {
        let device = adapter.device(addr)?;
        let name = device.name().await?.unwrap_or_default();
        if !is_known_device(&name) {
            continue;
        }
        let paired = device.is_paired().await?;
        let connected = device.is_connected().await?;

        debug!("Found device: {} ({}), paired={}, connected={}", name, addr, paired, connected);
        result.push(BluetoothDevice {
            name,
            address: addr,
            paired,
            connected,
            device,
        });
    }

    result.sort_by_key(|d| (!d.connected, !d.paired));
    info!("Found {} Fairbuds entries", result.len());
    Ok(result)
}

/// Transport for a device at a fixed address, e.g. from the config file.
pub async fn open(adapter: &Adapter, address: Address) -> Result<BluerTransport> {
    let device = adapter.device(address)?;
    let name = device.name().await?;
    Ok(BluerTransport::new(device, name))
}

/// Check if a device name matches the supported earbuds.
pub fn is_known_device(name: &str) -> bool {
    name.starts_with(NAME_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_known_device() {
        assert!(is_known_device("Fairbuds"));
        assert!(is_known_device("Fairbuds XL"));
        assert!(!is_known_device("HUAWEI FreeBuds Pro 3"));
        assert!(!is_known_device(""));
    }
}
