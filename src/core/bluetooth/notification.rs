//! Message routing for inbound notifications and read results
//! Decodes payloads, tags them with their channel and publishes them to
//! observers in arrival order.

use chrono::Local;
use log::{debug, warn};
use uuid::Uuid;

use crate::core::bluetooth::constants::INVALID_DATA_PLACEHOLDER;
use crate::core::bluetooth::observer::{BridgeEvent, EventEmitter};
use crate::core::bluetooth::types::{CharacteristicRole, InboundMessage};

/// Decodes a payload as UTF-8, substituting the placeholder on failure.
pub fn decode_payload(payload: &[u8]) -> (String, bool) {
    match std::str::from_utf8(payload) {
        Ok(text) => (text.to_string(), true),
        Err(_) => (INVALID_DATA_PLACEHOLDER.to_string(), false),
    }
}

pub struct MessageRouter {
    log: Vec<InboundMessage>,
    emitter: EventEmitter,
}

impl MessageRouter {
    pub fn new(emitter: EventEmitter) -> Self {
        Self {
            log: Vec::new(),
            emitter,
        }
    }

    /// Routes one value event from the transport.
    ///
    /// Errors are published as channel errors and never touch the log.
    pub fn route(
        &mut self,
        role: CharacteristicRole,
        characteristic: Uuid,
        result: Result<Vec<u8>, String>,
    ) -> Option<&InboundMessage> {
        let payload = match result {
            Ok(payload) => payload,
            Err(error) => {
                warn!(
                    "Error updating value for characteristic {} ({}): {}",
                    characteristic, role, error
                );
                self.emitter.emit(BridgeEvent::ChannelError { role, error });
                return None;
            }
        };

        let (text, valid_utf8) = decode_payload(&payload);
        if !valid_utf8 {
            warn!("Received undecodable payload from {}: {:?}", role, payload);
        }

        let message = InboundMessage {
            role,
            characteristic,
            payload,
            text,
            valid_utf8,
            received_at: Local::now(),
        };
        debug!("Received {}", message.display_line());

        self.emitter.emit(BridgeEvent::MessageAppended(message.clone()));
        self.log.push(message);
        self.log.last()
    }

    pub fn messages(&self) -> &[InboundMessage] {
        &self.log
    }

    pub fn clear(&mut self) {
        if self.log.is_empty() {
            return;
        }
        self.log.clear();
        self.emitter.emit(BridgeEvent::MessageLogCleared);
    }
}
