// src/ws.rs
use crate::types::{IncomingMessage, NfcCommand, OutgoingMessage};
use crossbeam_channel::Sender;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use warp::Filter;

pub async fn start_server(
    addr: SocketAddr,
    nfc_cmd_tx: Sender<NfcCommand>,
    mut nfc_event_rx: broadcast::Receiver<OutgoingMessage>,
) {
    // Shared Broadcast Channel for WS Clients
    let (ws_tx, _) = broadcast::channel::<OutgoingMessage>(32);
    let ws_tx = Arc::new(ws_tx);

    // 1. Task to forward NFC Events -> All WS Clients
    let ws_tx_clone = ws_tx.clone();
    tokio::spawn(async move {
        loop {
            match nfc_event_rx.recv().await {
                Ok(msg) => {
                    let _ = ws_tx_clone.send(msg);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Dropped {} NFC events, clients are too slow", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // 2. Define WS Route (Matches root path "/")
    let ws_route = warp::path::end()
        .and(warp::ws())
        .map(move |ws: warp::ws::Ws| {
            let nfc_cmd_tx = nfc_cmd_tx.clone();
            let ws_tx = ws_tx.clone();

            ws.on_upgrade(move |socket| handle_connection(socket, nfc_cmd_tx, ws_tx))
        });

    let routes = ws_route.with(warp::cors().allow_any_origin());

    info!("WebSocket server running on ws://{}", addr);
    warp::serve(routes).run(addr).await;
}

async fn handle_connection(
    ws: warp::ws::WebSocket,
    nfc_cmd_tx: Sender<NfcCommand>,
    ws_tx: Arc<broadcast::Sender<OutgoingMessage>>,
) {
    let (mut client_ws_tx, mut client_ws_rx) = ws.split();
    let mut rx_broadcast = ws_tx.subscribe();

    // Spawn task to send Broadcasts -> Client
    tokio::spawn(async move {
        while let Ok(msg) = rx_broadcast.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize {:?}: {}", msg, e);
                    continue;
                }
            };
            if client_ws_tx
                .send(warp::ws::Message::text(json))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    // Handle incoming messages from Client
    while let Some(result) = client_ws_rx.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                debug!("WebSocket receive error: {}", e);
                break;
            }
        };

        let Ok(text) = msg.to_str() else {
            continue;
        };

        match parse_command(text) {
            Some(cmd) => {
                debug!("Incoming command: {:?}", cmd);
                if nfc_cmd_tx.send(cmd).is_err() {
                    error!("NFC service is not running");
                    break;
                }
            }
            None => warn!("Ignoring unrecognized client message: {}", text),
        }
    }
}

fn parse_command(text: &str) -> Option<NfcCommand> {
    serde_json::from_str::<IncomingMessage>(text)
        .ok()
        .map(NfcCommand::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nfc_service;
    use crate::session::TagSession;
    use crate::tag::mock::{MockAccess, MockTag};

    #[test]
    fn parses_known_commands() {
        assert_eq!(parse_command(r#"{"type":"CLEAR"}"#), Some(NfcCommand::Clear));
        assert_eq!(
            parse_command(r#"{"type":"RELEASE_TAG"}"#),
            Some(NfcCommand::ReleaseTag)
        );
        assert_eq!(
            parse_command(r#"{"type":"GET_READER_STATUS"}"#),
            Some(NfcCommand::CheckReaderStatus)
        );
    }

    #[test]
    fn ignores_garbage() {
        assert_eq!(parse_command("not json"), None);
        assert_eq!(parse_command(r#"{"type":"FORMAT"}"#), None);
    }

    #[test]
    fn write_without_url_gets_an_error_reply() {
        let cmd = parse_command(r#"{"type":"WRITE"}"#).unwrap();
        assert_eq!(
            cmd,
            NfcCommand::Write {
                url: String::new(),
                card_id: None
            }
        );

        let session = TagSession::new(MockAccess::with_tag(1, MockTag::ndef(64)));
        session.on_tag_detected(1);
        let (tx, rx) = crossbeam_channel::unbounded();
        nfc_service::handle_command(&session, &[], cmd, &tx);

        assert_eq!(
            serde_json::to_value(rx.try_recv().unwrap()).unwrap(),
            serde_json::json!({
                "type": "OPERATION_ERROR",
                "operation": "write",
                "error": "URL is required"
            })
        );
    }
}
