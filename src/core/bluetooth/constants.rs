//! Constants used throughout the application
//! This module contains all the constant values used in the application,
//! such as UUIDs, timeouts, and display strings.

use uuid::Uuid;

/// The UUID of the camera node service
pub const UUID_CAMERA_SERVICE: Uuid = Uuid::from_u128(0x4fafc201_1fb5_459e_8fcc_c5c9c331914b);

/// Write-only characteristic receiving control commands
pub const UUID_CONTROL_CHAR: Uuid = Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26a8);

/// General device status notifications
pub const UUID_STATUS_CHAR: Uuid = Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26a9);

/// Preview stream information notifications
pub const UUID_PREVIEW_INFO_CHAR: Uuid = Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26aa);

/// Read-only command menu
pub const UUID_MENU_CHAR: Uuid = Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26ab);

/// Service metrics notifications
pub const UUID_SERVICE_METRICS_CHAR: Uuid =
    Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26ac);

/// Service status notifications
pub const UUID_SERVICE_STATUS_CHAR: Uuid =
    Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26ad);

/// Timeout for pending Bluetooth operations in seconds
pub const BLUETOOTH_OPERATION_TIMEOUT_SECS: u64 = 10;

/// Capacity of the observer broadcast channel
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Capacity of the request channel feeding the manager task
pub const REQUEST_CHANNEL_CAPACITY: usize = 32;

/// Text published in place of a payload that is not valid UTF-8
pub const INVALID_DATA_PLACEHOLDER: &str = "Invalid data";

/// Display name for devices that do not advertise one
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown Device";

pub const STATUS_DISCONNECTED: &str = "Disconnected";
pub const STATUS_SCANNING: &str = "Scanning...";
pub const STATUS_CONNECT_FAILED: &str = "Failed to connect";
pub const STATUS_SCAN_FAILED: &str = "Scan failed";
