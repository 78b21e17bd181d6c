use std::str::SplitWhitespace;

use anyhow::Result;
use camera_node_bridge::{
    commands,
    config::AppConfig,
    core::bluetooth::{BridgeEvent, EventEmitter},
    logging::BridgeLogger,
    state::AppState,
};
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};

const HELP: &str = "commands: scan | stop | devices | connect <id> | disconnect | \
send <code|label|text> | menu | status | help | quit";

#[tokio::main]
async fn main() -> Result<()> {
    let config_dir = AppConfig::config_dir();
    let config = AppConfig::load_config(&config_dir).await?;

    let emitter = EventEmitter::new(config.bluetooth.event_buffer);
    BridgeLogger::init_or_fallback(emitter.clone(), log::Level::Info);
    info!("Loaded configuration from {:?}", config_dir);

    let events = emitter.subscribe();
    let app_state = AppState::new(config, emitter).await?;
    tokio::spawn(print_events(events));

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            continue;
        };
        if verb == "quit" || verb == "exit" {
            break;
        }
        if let Err(e) = run_command(verb, words, &app_state).await {
            warn!("{}: {}", verb, e);
        }
    }

    app_state.shutdown();
    Ok(())
}

async fn run_command(verb: &str, mut args: SplitWhitespace<'_>, app_state: &AppState) -> Result<(), String> {
    match verb {
        "scan" => commands::start_scan(app_state).await,
        "stop" => commands::stop_scan(app_state).await,
        "disconnect" => commands::disconnect(app_state).await,
        "connect" => match args.next() {
            Some(id) => commands::connect_to_device(id, app_state).await,
            None => Err("usage: connect <id>".to_string()),
        },
        "send" => {
            let payload = args.collect::<Vec<_>>().join(" ");
            commands::send_command(&payload, app_state).await.map(|_| ())
        }
        "devices" => {
            let snapshot = commands::get_snapshot(app_state).await?;
            for device in snapshot.devices {
                println!(
                    "{}  {}  {}  {}",
                    device.id,
                    device.display_name(),
                    device.address,
                    device.rssi.map_or_else(|| "-".to_string(), |r| r.to_string())
                );
            }
            Ok(())
        }
        "menu" => {
            for command in commands::list_commands() {
                println!("{}", command);
            }
            Ok(())
        }
        "status" => {
            let snapshot = commands::get_snapshot(app_state).await?;
            println!("{} ({:?})", snapshot.status, snapshot.state);
            for message in &snapshot.messages {
                println!("{}", message.display_line());
            }
            Ok(())
        }
        "help" => {
            println!("{}", HELP);
            Ok(())
        }
        other => Err(format!("unknown command '{}'", other)),
    }
}

/// Prints every observer event as one JSON line on stdout.
async fn print_events(mut events: broadcast::Receiver<BridgeEvent>) {
    loop {
        match events.recv().await {
            // Logs already reach stderr.
            Ok(BridgeEvent::Log(_)) => {}
            Ok(event) => {
                if let Some(json) = EventEmitter::to_json(&event) {
                    println!("{}", json);
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!("Dropped {} events", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}
