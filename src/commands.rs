//! Frontend commands
//! This module defines all the commands that can be invoked from the
//! presentation layer. Progress is reported through [`BridgeEvent`]s.
//!
//! [`BridgeEvent`]: crate::core::bluetooth::BridgeEvent

use crate::core::bluetooth::{DeviceCommand, ManagerSnapshot, OutboundCommand};
use crate::state::AppState;

/// Starts scanning for camera nodes
///
/// Emits "devices-changed" for every newly discovered device and
/// "status-changed" when scanning starts.
pub async fn start_scan(app_state: &AppState) -> Result<(), String> {
    app_state
        .bluetooth
        .start_scan()
        .await
        .map_err(|e| e.to_string())
}

pub async fn stop_scan(app_state: &AppState) -> Result<(), String> {
    app_state
        .bluetooth
        .stop_scan()
        .await
        .map_err(|e| e.to_string())
}

/// Connects to a discovered device
///
/// # Arguments
/// * `device_id` - The platform identifier from the device list
/// * `app_state` - The application state
pub async fn connect_to_device(device_id: &str, app_state: &AppState) -> Result<(), String> {
    app_state
        .bluetooth
        .connect(device_id)
        .await
        .map_err(|e| e.to_string())
}

/// Disconnects from the currently connected device
pub async fn disconnect(app_state: &AppState) -> Result<(), String> {
    app_state
        .bluetooth
        .disconnect()
        .await
        .map_err(|e| e.to_string())
}

/// Sends a command payload; accepts a catalog code/label or raw text.
pub async fn send_command(command: &str, app_state: &AppState) -> Result<OutboundCommand, String> {
    let payload = match command.parse::<DeviceCommand>() {
        Ok(known) => known.code().to_string(),
        Err(_) => command.trim().to_string(),
    };
    app_state
        .bluetooth
        .send_command(&payload)
        .await
        .map_err(|e| e.to_string())
}

/// Commands offered in the command picker
pub fn list_commands() -> Vec<DeviceCommand> {
    DeviceCommand::ALL.to_vec()
}

pub async fn get_snapshot(app_state: &AppState) -> Result<ManagerSnapshot, String> {
    app_state
        .bluetooth
        .snapshot()
        .await
        .map_err(|e| e.to_string())
}
