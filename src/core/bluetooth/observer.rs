//! Push-based events for the presentation layer

use log::{debug, error};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::core::bluetooth::types::{
    BluetoothDevice, CharacteristicRole, ConnectionState, InboundMessage, OutboundCommand,
};
use crate::logging::LogMessage;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum BridgeEvent {
    StatusChanged(String),
    StateChanged(ConnectionState),
    DevicesChanged(Vec<BluetoothDevice>),
    MessageAppended(InboundMessage),
    MessageLogCleared,
    ChannelError {
        role: CharacteristicRole,
        error: String,
    },
    CommandUpdated(OutboundCommand),
    Log(LogMessage),
}

impl BridgeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            BridgeEvent::StatusChanged(_) => "status-changed",
            BridgeEvent::StateChanged(_) => "state-changed",
            BridgeEvent::DevicesChanged(_) => "devices-changed",
            BridgeEvent::MessageAppended(_) => "message-appended",
            BridgeEvent::MessageLogCleared => "message-log-cleared",
            BridgeEvent::ChannelError { .. } => "channel-error",
            BridgeEvent::CommandUpdated(_) => "command-updated",
            BridgeEvent::Log(_) => "log",
        }
    }
}

/// Clonable fan-out of [`BridgeEvent`]s to any number of observers.
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<BridgeEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: BridgeEvent) {
        let name = event.name();
        if self.tx.send(event).is_err() {
            debug!("No observers for {} event", name);
        }
    }

    /// Sends without logging; used by the logger itself.
    pub(crate) fn emit_silent(&self, event: BridgeEvent) {
        let _ = self.tx.send(event);
    }

    /// Renders an event as JSON for line-oriented frontends.
    pub fn to_json(event: &BridgeEvent) -> Option<String> {
        match serde_json::to_string(event) {
            Ok(json) => Some(json),
            Err(e) => {
                error!("Failed to serialize {} event: {}", event.name(), e);
                None
            }
        }
    }
}
