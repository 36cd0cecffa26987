mod apdu;
mod cards;
mod config;
mod error;
mod ndef;
mod nfc_service;
mod session;
mod tag;
mod types;
mod uri_prefix;
mod ws;

use crossbeam_channel::unbounded;
use log::{error, info};
use tokio::sync::broadcast;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match config::Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(2);
        }
    };
    info!("Starting NFC Rust Service with {:?}", config);

    // Channel: WS -> NFC (Commands)
    // Crossbeam (Sync) because the NFC thread is blocking
    let (cmd_tx, cmd_rx) = unbounded::<types::NfcCommand>();

    // Channel: NFC -> WS (Events)
    let (event_tx, event_rx) = broadcast::channel::<types::OutgoingMessage>(100);

    // Bridge NFC thread -> broadcast
    let (bridge_tx, bridge_rx) = unbounded::<types::OutgoingMessage>();
    std::thread::spawn(move || {
        while let Ok(msg) = bridge_rx.recv() {
            let _ = event_tx.send(msg);
        }
    });

    // NFC thread owns the reader and the tag session
    let nfc_config = config.clone();
    std::thread::spawn(move || {
        nfc_service::run(nfc_config, bridge_tx, cmd_rx);
    });

    ws::start_server(config.listen_addr, cmd_tx, event_rx).await;
}
