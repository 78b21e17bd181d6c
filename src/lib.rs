//! Camera node bridge library
//! BLE central client for a single camera node peripheral.

// Module declarations
pub mod commands;
pub mod config;
pub mod core;
pub mod logging;
pub mod state;
pub mod utils;
