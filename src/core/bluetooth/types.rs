//! Defines shared data structures for the Bluetooth module.

use std::fmt;

use chrono::{DateTime, Local};
use serde::Serialize;
use uuid::Uuid;

use crate::core::bluetooth::constants::UNKNOWN_DEVICE_NAME;

/// Represents a discovered Bluetooth device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BluetoothDevice {
    /// Platform-specific unique identifier for the device
    pub id: String,
    /// The name of the device, if advertised
    pub name: Option<String>,
    /// The MAC address embedded in the identifier, or "N/A"
    pub address: String,
    /// The last seen signal strength (RSSI) of the device
    pub rssi: Option<i16>,
}

impl BluetoothDevice {
    /// Creates a new BluetoothDevice instance
    pub fn new(id: String, name: Option<String>, address: String, rssi: Option<i16>) -> Self {
        Self {
            id,
            name,
            address,
            rssi,
        }
    }

    /// Name shown to the user
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_DEVICE_NAME)
    }
}

/// Power and authorization state reported by the radio stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RadioState {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl RadioState {
    pub fn is_powered_on(self) -> bool {
        self == RadioState::PoweredOn
    }

    pub fn status_text(self) -> &'static str {
        match self {
            RadioState::Unknown => "Bluetooth Unknown",
            RadioState::Resetting => "Bluetooth Resetting",
            RadioState::Unsupported => "Bluetooth Unsupported",
            RadioState::Unauthorized => "Bluetooth Unauthorized",
            RadioState::PoweredOff => "Bluetooth Off",
            RadioState::PoweredOn => "Bluetooth On",
        }
    }
}

impl fmt::Display for RadioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.status_text())
    }
}

/// Lifecycle of the single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting,
    DiscoveringServices,
    DiscoveringCharacteristics,
    SubscriptionsPending,
    Ready,
    Disconnecting,
    Failed,
}

impl ConnectionState {
    /// States in which a link is being set up but not yet usable.
    pub fn is_pre_ready(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::DiscoveringServices
                | ConnectionState::DiscoveringCharacteristics
                | ConnectionState::SubscriptionsPending
        )
    }
}

/// Semantic role of a characteristic of the camera service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CharacteristicRole {
    Control,
    Status,
    PreviewInfo,
    Menu,
    ServiceStatus,
    ServiceMetrics,
}

impl CharacteristicRole {
    pub const ALL: [CharacteristicRole; 6] = [
        CharacteristicRole::Control,
        CharacteristicRole::Status,
        CharacteristicRole::PreviewInfo,
        CharacteristicRole::Menu,
        CharacteristicRole::ServiceStatus,
        CharacteristicRole::ServiceMetrics,
    ];
}

impl fmt::Display for CharacteristicRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CharacteristicRole::Control => "control",
            CharacteristicRole::Status => "status",
            CharacteristicRole::PreviewInfo => "preview-info",
            CharacteristicRole::Menu => "menu",
            CharacteristicRole::ServiceStatus => "service-status",
            CharacteristicRole::ServiceMetrics => "service-metrics",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubscriptionState {
    None,
    Subscribing,
    Subscribed,
}

/// Opaque platform reference to a discovered characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PlatformHandle(pub u64);

/// A characteristic discovered on the camera service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveredCharacteristic {
    pub uuid: Uuid,
    pub handle: PlatformHandle,
}

/// A resolved characteristic bound to its role for the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CharacteristicHandle {
    pub role: CharacteristicRole,
    pub uuid: Uuid,
    pub handle: PlatformHandle,
    pub subscription: SubscriptionState,
}

/// A decoded notification or read result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboundMessage {
    pub role: CharacteristicRole,
    pub characteristic: Uuid,
    pub payload: Vec<u8>,
    /// Decoded text, or the invalid-data placeholder
    pub text: String,
    pub valid_utf8: bool,
    pub received_at: DateTime<Local>,
}

impl InboundMessage {
    /// Log line in the `[UUID] text` form.
    pub fn display_line(&self) -> String {
        format!(
            "[{}] {}",
            self.characteristic.to_string().to_uppercase(),
            self.text
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CommandStatus {
    Pending,
    Sent,
    Failed(String),
}

/// A command written to the control characteristic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundCommand {
    pub id: u64,
    pub payload: String,
    pub role: CharacteristicRole,
    pub status: CommandStatus,
}
