//! Discovered device bookkeeping
//! Keeps the known-device list deduplicated by identifier in first-seen order.

use std::sync::OnceLock;

use log::{debug, info};
use regex::Regex;

use crate::core::bluetooth::types::BluetoothDevice;

/// Outcome of recording a discovery event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discovery {
    /// First time this identifier was seen
    New,
    /// Already known; signal strength refreshed
    Updated,
    /// Dropped by the signal strength filter
    Filtered,
}

#[derive(Debug, Default)]
pub struct DeviceList {
    devices: Vec<BluetoothDevice>,
    min_rssi: Option<i16>,
}

impl DeviceList {
    pub fn new(min_rssi: Option<i16>) -> Self {
        Self {
            devices: Vec::new(),
            min_rssi,
        }
    }

    /// Records a device-discovered event.
    pub fn record(&mut self, device: BluetoothDevice) -> Discovery {
        if !self.passes_rssi_threshold(device.rssi) {
            debug!("Ignoring weak device {} (RSSI {:?})", device.id, device.rssi);
            return Discovery::Filtered;
        }

        if let Some(known) = self.devices.iter_mut().find(|d| d.id == device.id) {
            if device.rssi.is_some() {
                known.rssi = device.rssi;
            }
            if known.name.is_none() {
                known.name = device.name;
            }
            return Discovery::Updated;
        }

        info!(
            "Discovered peripheral: {} ({})",
            device.display_name(),
            device.id
        );
        self.devices.push(device);
        Discovery::New
    }

    fn passes_rssi_threshold(&self, rssi: Option<i16>) -> bool {
        match (self.min_rssi, rssi) {
            (Some(threshold), Some(signal_strength)) => signal_strength >= threshold,
            _ => true,
        }
    }

    pub fn get(&self, device_id: &str) -> Option<&BluetoothDevice> {
        self.devices.iter().find(|d| d.id == device_id)
    }

    pub fn devices(&self) -> &[BluetoothDevice] {
        &self.devices
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }
}

/// Extracts a MAC address embedded in a platform device identifier.
pub fn extract_mac_address(device_id: &str) -> Option<String> {
    static MAC_RE: OnceLock<Regex> = OnceLock::new();
    let re = MAC_RE.get_or_init(|| {
        Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").expect("valid MAC regex")
    });
    re.find_iter(device_id)
        .last()
        .map(|m| m.as_str().to_uppercase())
}
