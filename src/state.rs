//! Application state management
//! This module wires the transport, the Bluetooth manager task and the
//! observer channel together.

use std::sync::Arc;

use anyhow::Result;
use log::info;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::core::bluetooth::{
    BleTransport, BluestTransport, BluetoothHandle, BluetoothManager, BridgeEvent, EventEmitter,
    TransportEvent,
};

/// Global application state
pub struct AppState {
    /// Handle to the Bluetooth manager task
    pub bluetooth: BluetoothHandle,
    pub config: AppConfig,
    manager_task: JoinHandle<()>,
}

impl AppState {
    /// Creates a new AppState backed by the platform Bluetooth adapter
    pub async fn new(config: AppConfig, emitter: EventEmitter) -> Result<Self> {
        info!("Initializing BluetoothManager...");
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = BluestTransport::new(events_tx).await?;
        Ok(Self::with_transport(config, emitter, Arc::new(transport), events_rx))
    }

    /// Creates the state over any transport.
    pub fn with_transport(
        config: AppConfig,
        emitter: EventEmitter,
        transport: Arc<dyn BleTransport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        let manager = BluetoothManager::new(transport, config.bluetooth.clone(), emitter);
        let (bluetooth, manager_task) = manager.spawn(events);
        Self {
            bluetooth,
            config,
            manager_task,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.bluetooth.emitter().subscribe()
    }

    /// Stops the manager task; pending requests fail with `ManagerUnavailable`.
    pub fn shutdown(self) {
        self.manager_task.abort();
        info!("Bluetooth manager stopped.");
    }
}
