use std::sync::OnceLock;

use chrono::Local;
use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};
use serde::Serialize;

use crate::core::bluetooth::observer::{BridgeEvent, EventEmitter};

static LOGGER: OnceLock<BridgeLogger> = OnceLock::new();

#[derive(Debug, Serialize, Clone)]
pub struct LogMessage {
    level: String,
    message: String,
    timestamp: String,
}

impl LogMessage {
    fn from_record(record: &Record) -> Self {
        Self {
            level: record.level().to_string(),
            message: record.args().to_string(),
            timestamp: Local::now().to_rfc3339(),
        }
    }
}

/// Writes records to stderr and forwards them to observers.
pub struct BridgeLogger {
    emitter: EventEmitter,
    level: Level,
}

impl BridgeLogger {
    pub fn new(emitter: EventEmitter, level: Level) -> Self {
        Self { emitter, level }
    }

    pub fn init(emitter: EventEmitter, level: Level) -> Result<(), SetLoggerError> {
        let logger = LOGGER.get_or_init(|| BridgeLogger::new(emitter, level));
        log::set_logger(logger).map(|()| log::set_max_level(level.to_level_filter()))
    }

    /// Installs the bridge logger, or env_logger if a logger already exists.
    pub fn init_or_fallback(emitter: EventEmitter, level: Level) {
        if BridgeLogger::init(emitter, level).is_err() {
            let _ = env_logger::builder()
                .filter_level(LevelFilter::Info)
                .try_init();
        }
    }

    fn emit_log(&self, record: &Record) {
        // Must not log from here.
        self.emitter
            .emit_silent(BridgeEvent::Log(LogMessage::from_record(record)));
    }
}

impl log::Log for BridgeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
            self.emit_log(record);
        }
    }

    fn flush(&self) {}
}
