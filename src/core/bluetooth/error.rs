//! Error taxonomy for the Bluetooth core.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::core::bluetooth::types::{CharacteristicRole, RadioState};

/// Radio operation a deadline is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Operation {
    Connect,
    DiscoverServices,
    DiscoverCharacteristics,
    Subscribe,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Connect => "connect",
            Operation::DiscoverServices => "service discovery",
            Operation::DiscoverCharacteristics => "characteristic discovery",
            Operation::Subscribe => "subscription",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BluetoothError {
    #[error("Bluetooth radio unavailable: {0}")]
    RadioUnavailable(RadioState),
    #[error("Failed to connect: {0}")]
    ConnectFailed(String),
    #[error("Camera service not found: {0}")]
    ServiceNotFound(Uuid),
    #[error("Device disconnected unexpectedly")]
    SpontaneousDisconnect,
    #[error("Notification payload is not valid UTF-8")]
    NotificationDecodeError,
    #[error("Write failed: {0}")]
    WriteFailed(String),
    #[error("No device connected")]
    NotConnected,
    #[error("Characteristic for role {0} was not discovered")]
    RoleUnavailable(CharacteristicRole),
    #[error("Timed out waiting for {0}")]
    OperationTimedOut(Operation),
    #[error("Device not found with ID: {0}")]
    UnknownDevice(String),
    #[error("Command payload is empty")]
    EmptyCommand,
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Bluetooth manager is not running")]
    ManagerUnavailable,
}

pub type BluetoothResult<T> = Result<T, BluetoothError>;
