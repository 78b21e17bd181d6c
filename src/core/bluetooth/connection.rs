//! The single active or pending link to a camera node

use tokio::time::{Duration, Instant};

use crate::core::bluetooth::error::Operation;
use crate::core::bluetooth::types::BluetoothDevice;

/// Fields of the current connection attempt; dropped on teardown.
#[derive(Debug, Clone)]
pub struct Connection {
    pub device: BluetoothDevice,
    /// Operation awaiting completion and its deadline
    pending: Option<(Operation, Option<Instant>)>,
}

impl Connection {
    pub fn new(device: BluetoothDevice) -> Self {
        Self {
            device,
            pending: None,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    pub fn display_name(&self) -> &str {
        self.device.display_name()
    }

    pub fn matches(&self, device_id: &str) -> bool {
        self.device.id == device_id
    }

    /// Records an outstanding operation; `timeout` of `None` waits forever.
    pub fn begin(&mut self, operation: Operation, timeout: Option<Duration>) {
        self.pending = Some((operation, timeout.map(|t| Instant::now() + t)));
    }

    pub fn finish(&mut self) {
        self.pending = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.and_then(|(_, deadline)| deadline)
    }

    /// Returns the operation whose deadline has passed at `now`.
    pub fn expired(&self, now: Instant) -> Option<Operation> {
        match self.pending {
            Some((op, Some(deadline))) if deadline <= now => Some(op),
            _ => None,
        }
    }
}
