//! Transport adapter over the platform radio stack
//! Every operation only issues a request; the outcome is reported later as a
//! [`TransportEvent`] on the channel the transport was created with.

use anyhow::Result;
use uuid::Uuid;

use crate::core::bluetooth::types::{BluetoothDevice, DiscoveredCharacteristic, RadioState};

/// Asynchronous completion, error and notification events from the radio.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    RadioStateChanged(RadioState),
    DeviceDiscovered(BluetoothDevice),
    /// The scan could not be started or its stream failed
    ScanFailed {
        error: String,
    },
    Connected {
        device_id: String,
    },
    ConnectFailed {
        device_id: String,
        error: String,
    },
    Disconnected {
        device_id: String,
        error: Option<String>,
    },
    ServicesDiscovered {
        device_id: String,
        result: Result<Vec<Uuid>, String>,
    },
    CharacteristicsDiscovered {
        device_id: String,
        service: Uuid,
        result: Result<Vec<DiscoveredCharacteristic>, String>,
    },
    /// Acknowledgement of a `set_notify` request
    NotifyStateChanged {
        device_id: String,
        characteristic: Uuid,
        result: Result<bool, String>,
    },
    /// Notification or read result
    ValueUpdated {
        device_id: String,
        characteristic: Uuid,
        result: Result<Vec<u8>, String>,
    },
    WriteResult {
        device_id: String,
        characteristic: Uuid,
        result: Result<(), String>,
    },
}

/// Capability the connection state machine drives the radio through.
///
/// An `Err` return means the request could not even be issued; it is
/// handled like the matching failure event.
#[async_trait::async_trait]
pub trait BleTransport: Send + Sync {
    async fn start_scan(&self, service_filter: Uuid) -> Result<()>;
    async fn stop_scan(&self) -> Result<()>;
    async fn connect(&self, device_id: &str) -> Result<()>;
    async fn cancel_connection(&self, device_id: &str) -> Result<()>;
    async fn discover_services(&self, device_id: &str, filter: Uuid) -> Result<()>;
    async fn discover_characteristics(&self, device_id: &str, service: Uuid) -> Result<()>;
    async fn set_notify(&self, device_id: &str, characteristic: Uuid, enabled: bool) -> Result<()>;
    async fn read_value(&self, device_id: &str, characteristic: Uuid) -> Result<()>;
    async fn write_value(
        &self,
        device_id: &str,
        characteristic: Uuid,
        data: &[u8],
        with_response: bool,
    ) -> Result<()>;
}
