//! Bluetooth functionality for the camera node bridge
//! This module handles all bluetooth operations including scanning,
//! connecting, discovering characteristics, routing notifications
//! and sending commands to the camera node.

pub mod bluest_transport;
pub mod commands;
pub mod connection;
pub mod constants;
pub mod error;
pub mod manager;
pub mod notification;
pub mod observer;
pub mod registry;
pub mod scanner;
pub mod transport;
pub mod types;

// Re-export types that should be publicly accessible
pub use bluest_transport::BluestTransport;
pub use commands::{CommandDispatcher, DeviceCommand};
pub use constants::*; // Re-export all constants
pub use error::{BluetoothError, BluetoothResult, Operation};
pub use manager::{BluetoothHandle, BluetoothManager, ManagerRequest, ManagerSnapshot};
pub use notification::MessageRouter;
pub use observer::{BridgeEvent, EventEmitter};
pub use registry::CharacteristicRegistry;
pub use scanner::DeviceList;
pub use transport::{BleTransport, TransportEvent};
pub use types::{
    BluetoothDevice, CharacteristicHandle, CharacteristicRole, CommandStatus, ConnectionState,
    InboundMessage, OutboundCommand, RadioState, SubscriptionState,
};
