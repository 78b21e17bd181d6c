//! Camera node commands
//! This module contains the command catalog and the dispatcher that writes
//! commands to the control characteristic.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use log::{info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::core::bluetooth::error::{BluetoothError, BluetoothResult};
use crate::core::bluetooth::observer::{BridgeEvent, EventEmitter};
use crate::core::bluetooth::registry::CharacteristicRegistry;
use crate::core::bluetooth::transport::BleTransport;
use crate::core::bluetooth::types::{CharacteristicRole, CommandStatus, OutboundCommand};

/// Commands understood by the camera node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceCommand {
    /// Start Preview ("1")
    StartPreview,
    /// Stop Preview ("2")
    StopPreview,
    /// Start Data Collection ("3")
    StartDataCollection,
    /// Stop Data Collection ("4")
    StopDataCollection,
    /// Start Inference ("5")
    StartInference,
    /// Stop Inference ("6")
    StopInference,
}

impl DeviceCommand {
    pub const ALL: [DeviceCommand; 6] = [
        DeviceCommand::StartPreview,
        DeviceCommand::StopPreview,
        DeviceCommand::StartDataCollection,
        DeviceCommand::StopDataCollection,
        DeviceCommand::StartInference,
        DeviceCommand::StopInference,
    ];

    /// Wire payload of the command
    pub fn code(&self) -> &'static str {
        match self {
            Self::StartPreview => "1",
            Self::StopPreview => "2",
            Self::StartDataCollection => "3",
            Self::StopDataCollection => "4",
            Self::StartInference => "5",
            Self::StopInference => "6",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::StartPreview => "Start Preview",
            Self::StopPreview => "Stop Preview",
            Self::StartDataCollection => "Start Data Collection",
            Self::StopDataCollection => "Stop Data Collection",
            Self::StartInference => "Start Inference",
            Self::StopInference => "Stop Inference",
        }
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.label())
    }
}

impl FromStr for DeviceCommand {
    type Err = BluetoothError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(BluetoothError::EmptyCommand);
        }
        Self::ALL
            .into_iter()
            .find(|cmd| cmd.code() == trimmed || cmd.label().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| BluetoothError::UnknownCommand(trimmed.to_string()))
    }
}

/// Encodes a command payload for the control characteristic.
pub fn encode_command(payload: &str) -> BluetoothResult<Vec<u8>> {
    if payload.is_empty() {
        return Err(BluetoothError::EmptyCommand);
    }
    Ok(payload.as_bytes().to_vec())
}

/// Writes commands and tracks their acknowledgements.
pub struct CommandDispatcher {
    next_id: u64,
    /// Writes awaiting acknowledgement, oldest first
    outstanding: VecDeque<OutboundCommand>,
    emitter: EventEmitter,
}

impl CommandDispatcher {
    pub fn new(emitter: EventEmitter) -> Self {
        Self {
            next_id: 1,
            outstanding: VecDeque::new(),
            emitter,
        }
    }

    /// Sends `payload` to the control characteristic of `device_id`.
    ///
    /// `device_id` is `None` unless the connection is ready.
    pub async fn send<T: BleTransport + ?Sized>(
        &mut self,
        transport: &T,
        device_id: Option<&str>,
        registry: &CharacteristicRegistry,
        payload: &str,
    ) -> BluetoothResult<OutboundCommand> {
        let Some(device_id) = device_id else {
            warn!("Command {:?} rejected: not connected", payload);
            return Err(BluetoothError::NotConnected);
        };
        let Some(control) = registry.lookup(CharacteristicRole::Control) else {
            warn!("Command {:?} rejected: control characteristic not found", payload);
            return Err(BluetoothError::RoleUnavailable(CharacteristicRole::Control));
        };
        let data = encode_command(payload).inspect_err(|_| {
            warn!("Command rejected: empty payload");
        })?;

        let mut command = OutboundCommand {
            id: self.next_id,
            payload: payload.to_string(),
            role: CharacteristicRole::Control,
            status: CommandStatus::Pending,
        };
        self.next_id += 1;

        if let Err(e) = transport
            .write_value(device_id, control.uuid, &data, true)
            .await
        {
            warn!("Failed to send command {:?}: {}", payload, e);
            command.status = CommandStatus::Failed(e.to_string());
            self.emitter.emit(BridgeEvent::CommandUpdated(command.clone()));
            return Err(BluetoothError::WriteFailed(e.to_string()));
        }

        info!("Sent command: {}", payload);
        self.emitter.emit(BridgeEvent::CommandUpdated(command.clone()));
        self.outstanding.push_back(command.clone());
        Ok(command)
    }

    /// Resolves the oldest outstanding write with its acknowledgement.
    pub fn complete(&mut self, characteristic: Uuid, result: Result<(), String>) -> Option<OutboundCommand> {
        let Some(mut command) = self.outstanding.pop_front() else {
            warn!("Write result for {} without an outstanding command", characteristic);
            return None;
        };

        command.status = match result {
            Ok(()) => {
                info!("Successfully wrote command {:?} to characteristic {}", command.payload, characteristic);
                CommandStatus::Sent
            }
            Err(e) => {
                warn!("Error writing command {:?} to characteristic {}: {}", command.payload, characteristic, e);
                CommandStatus::Failed(e)
            }
        };
        self.emitter.emit(BridgeEvent::CommandUpdated(command.clone()));
        Some(command)
    }

    #[cfg(test)]
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Drops outstanding writes of a torn down connection.
    pub fn reset(&mut self) {
        for mut command in self.outstanding.drain(..) {
            command.status = CommandStatus::Failed(BluetoothError::NotConnected.to_string());
            self.emitter.emit(BridgeEvent::CommandUpdated(command));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::UUID_CONTROL_CHAR;
    use crate::core::bluetooth::transport::mock::{RecordingTransport, TransportCall};
    use crate::core::bluetooth::types::PlatformHandle;

    fn registry_with_control() -> CharacteristicRegistry {
        let mut registry = CharacteristicRegistry::new();
        registry.resolve(CharacteristicRole::Control, PlatformHandle(1));
        registry
    }

    #[test]
    fn catalog_codes_and_parsing() {
        let codes: Vec<_> = DeviceCommand::ALL.iter().map(|c| c.code()).collect();
        assert_eq!(codes, vec!["1", "2", "3", "4", "5", "6"]);
        assert_eq!("3".parse::<DeviceCommand>().unwrap(), DeviceCommand::StartDataCollection);
        assert_eq!("stop inference".parse::<DeviceCommand>().unwrap(), DeviceCommand::StopInference);
        assert_eq!("".parse::<DeviceCommand>(), Err(BluetoothError::EmptyCommand));
        assert_eq!(
            "9".parse::<DeviceCommand>(),
            Err(BluetoothError::UnknownCommand("9".into()))
        );
        assert_eq!(DeviceCommand::StartPreview.to_string(), "1: Start Preview");
    }

    #[tokio::test]
    async fn not_connected_never_touches_transport() {
        let transport = RecordingTransport::new();
        let mut dispatcher = CommandDispatcher::new(EventEmitter::new(8));
        let result = dispatcher
            .send(&transport, None, &registry_with_control(), "1")
            .await;
        assert_eq!(result, Err(BluetoothError::NotConnected));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_control_role_is_reported() {
        let transport = RecordingTransport::new();
        let mut dispatcher = CommandDispatcher::new(EventEmitter::new(8));
        let result = dispatcher
            .send(&transport, Some("dev"), &CharacteristicRegistry::new(), "1")
            .await;
        assert_eq!(
            result,
            Err(BluetoothError::RoleUnavailable(CharacteristicRole::Control))
        );
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn writes_exact_utf8_bytes_with_response() {
        let transport = RecordingTransport::new();
        let mut dispatcher = CommandDispatcher::new(EventEmitter::new(8));
        let command = dispatcher
            .send(&transport, Some("dev"), &registry_with_control(), "3")
            .await
            .unwrap();
        assert_eq!(command.status, CommandStatus::Pending);
        assert_eq!(
            transport.calls(),
            vec![TransportCall::WriteValue(
                "dev".into(),
                UUID_CONTROL_CHAR,
                vec![0x33],
                true
            )]
        );
        assert_eq!(dispatcher.outstanding(), 1);
    }

    #[tokio::test]
    async fn acknowledgements_resolve_in_write_order() {
        let transport = RecordingTransport::new();
        let mut dispatcher = CommandDispatcher::new(EventEmitter::new(8));
        let registry = registry_with_control();
        dispatcher.send(&transport, Some("dev"), &registry, "1").await.unwrap();
        dispatcher.send(&transport, Some("dev"), &registry, "2").await.unwrap();

        let first = dispatcher.complete(UUID_CONTROL_CHAR, Ok(())).unwrap();
        assert_eq!(first.payload, "1");
        assert_eq!(first.status, CommandStatus::Sent);

        let second = dispatcher
            .complete(UUID_CONTROL_CHAR, Err("write not permitted".into()))
            .unwrap();
        assert_eq!(second.payload, "2");
        assert_eq!(second.status, CommandStatus::Failed("write not permitted".into()));
        assert!(dispatcher.complete(UUID_CONTROL_CHAR, Ok(())).is_none());
    }

    #[tokio::test]
    async fn synchronous_write_failure_is_reported_without_retry() {
        let transport = RecordingTransport::new();
        transport.reject_writes(true);
        let mut dispatcher = CommandDispatcher::new(EventEmitter::new(8));
        let result = dispatcher
            .send(&transport, Some("dev"), &registry_with_control(), "4")
            .await;
        assert!(matches!(result, Err(BluetoothError::WriteFailed(_))));
        assert_eq!(transport.calls().len(), 1);
        assert_eq!(dispatcher.outstanding(), 0);
    }

    #[test]
    fn empty_payload_is_rejected() {
        assert_eq!(encode_command(""), Err(BluetoothError::EmptyCommand));
        assert_eq!(encode_command("6").unwrap(), vec![0x36]);
    }
}
