//! Core functionality for the camera node bridge
//! This module contains the BLE central that talks to the camera node.

pub mod bluetooth;

// Re-export commonly used types
pub use bluetooth::BluetoothManager;
