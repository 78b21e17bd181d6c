use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::core::bluetooth::constants::{BLUETOOTH_OPERATION_TIMEOUT_SECS, DEFAULT_EVENT_BUFFER};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Deadline for each pending connect/discovery/subscription step.
    /// `0` disables the deadline and waits indefinitely.
    pub operation_timeout_secs: u64,

    /// Devices advertising weaker than this RSSI (dBm) are not listed.
    pub min_rssi: Option<i16>,

    /// Start scanning as soon as the radio reports powered on.
    pub auto_scan_on_power_on: bool,

    /// Capacity of the observer event channel.
    pub event_buffer: usize,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        BluetoothConfig {
            operation_timeout_secs: BLUETOOTH_OPERATION_TIMEOUT_SECS,
            min_rssi: None,
            auto_scan_on_power_on: true,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl BluetoothConfig {
    pub fn operation_timeout(&self) -> Option<Duration> {
        match self.operation_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
