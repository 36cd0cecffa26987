// src/nfc_service.rs
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use log::{error, info, warn};
use pcsc::{Context, PNP_NOTIFICATION, ReaderState, Scope, State};
use std::ffi::{CStr, CString};
use std::time::Duration;

use crate::cards::{self, PcscAccess};
use crate::config::Config;
use crate::session::TagSession;
use crate::tag::TagAccess;
use crate::types::{NfcCommand, Operation, OutgoingMessage};

pub fn run(config: Config, tx: Sender<OutgoingMessage>, rx: Receiver<NfcCommand>) {
    info!("Starting NFC Service (Event Driven)...");

    let ctx = match Context::establish(Scope::User) {
        Ok(ctx) => ctx,
        Err(err) => {
            error!("Failed to establish context: {}", err);
            let _ = tx.send(OutgoingMessage::READER_ERROR {
                error: err.to_string(),
            });

            // Keep answering clients; every tag operation reports the missing reader stack
            let session = TagSession::new(PcscAccess::new(
                None,
                config.operation_timeout,
                config.format_data_area,
            ));
            while let Ok(cmd) = rx.recv() {
                handle_command(&session, &[], cmd, &tx);
            }
            return;
        }
    };

    let session = TagSession::new(PcscAccess::new(
        Some(ctx.clone()),
        config.operation_timeout,
        config.format_data_area,
    ));

    let mut readers_buf = [0; 2048];
    let mut reader_names: Vec<CString> = Vec::new();
    let mut reader_states = vec![ReaderState::new(PNP_NOTIFICATION(), State::UNAWARE)];

    loop {
        // 1. Wait for State Change
        if let Err(err) = ctx.get_status_change(config.poll_interval, &mut reader_states) {
            if err != pcsc::Error::Timeout {
                error!("PCSC Error: {}", err);
                std::thread::sleep(Duration::from_secs(1));
            }
        }

        // 2. CHECK FOR COMMANDS
        loop {
            match rx.try_recv() {
                // Reader states are left alone so a tag already on the reader is not re-detected
                Ok(NfcCommand::CheckReaderStatus) => {
                    reader_names = list_readers(&ctx, &mut readers_buf);
                    let _ = tx.send(OutgoingMessage::READER_STATUS {
                        success: !reader_names.is_empty(),
                    });
                }
                Ok(cmd) => handle_command(&session, &reader_names, cmd, &tx),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    info!("Command channel closed, stopping NFC service");
                    return;
                }
            }
        }

        // 3. PROCESS EVENTS
        let mut readers_changed = false;

        // Check PnP (Index 0)
        if reader_states[0].event_state().intersects(State::CHANGED) {
            info!("Hardware change detected");
            readers_changed = true;
            reader_states[0].sync_current_state();
        }

        // Check Readers (Indices 1..)
        for i in 1..reader_states.len() {
            let rs = &reader_states[i];
            if !rs.event_state().intersects(State::CHANGED) {
                continue;
            }

            let current = rs.event_state();
            let name = rs.name().to_owned();

            // Card Inserted
            if current.intersects(State::PRESENT) && !rs.current_state().intersects(State::PRESENT)
            {
                info!("Card Inserted on {:?}", name);
                match cards::identify(&ctx, &name) {
                    Ok(tag) => {
                        info!("Tag detected, uid {}", hex::encode(&tag.uid));
                        let _ = tx.send(OutgoingMessage::TAG_DETECTED {
                            reader: name.to_string_lossy().into_owned(),
                            atr: hex::encode(&tag.atr),
                        });
                        session.on_tag_detected(tag);
                    }
                    Err(e) => warn!("Failed to identify tag on {:?}: {}", name, e),
                }
            }

            // Card Removed
            if current.intersects(State::EMPTY) && rs.current_state().intersects(State::PRESENT) {
                info!("Card Removed from {:?}", name);
                let _ = tx.send(OutgoingMessage::TAG_REMOVED {
                    reader: name.to_string_lossy().into_owned(),
                });
            }

            reader_states[i].sync_current_state();
        }

        // 4. REFRESH LIST
        if readers_changed {
            reader_names = list_readers(&ctx, &mut readers_buf);
            sync_reader_states(&mut reader_states, &reader_names);
            let _ = tx.send(OutgoingMessage::READER_STATUS {
                success: !reader_names.is_empty(),
            });
        }
    }
}

fn list_readers(ctx: &Context, readers_buf: &mut [u8]) -> Vec<CString> {
    match ctx.list_readers(readers_buf) {
        Ok(iter) => iter.map(CString::from).collect(),
        Err(err) => {
            if err != pcsc::Error::NoReadersAvailable {
                warn!("Failed to list readers: {}", err);
            }
            Vec::new()
        }
    }
}

// Keeps the PnP state and the state of every reader still connected,
// drops unplugged readers and adds new ones as UNAWARE
fn sync_reader_states(reader_states: &mut Vec<ReaderState>, reader_names: &[CString]) {
    let is_listed = |name: &CStr| reader_names.iter().any(|n| n.as_c_str() == name);

    reader_states.retain(|rs| rs.name() == PNP_NOTIFICATION() || is_listed(rs.name()));
    for name in reader_names {
        if !reader_states.iter().any(|rs| rs.name() == name.as_c_str()) {
            reader_states.push(ReaderState::new(name.clone(), State::UNAWARE));
        }
    }
}

pub fn handle_command<A: TagAccess>(
    session: &TagSession<A>,
    reader_names: &[CString],
    cmd: NfcCommand,
    tx: &Sender<OutgoingMessage>,
) {
    let msg = match cmd {
        NfcCommand::CheckReaderStatus => OutgoingMessage::READER_STATUS {
            success: !reader_names.is_empty(),
        },
        NfcCommand::IsSupported => OutgoingMessage::SUPPORTED {
            supported: session.is_supported(),
        },
        NfcCommand::HasTag => OutgoingMessage::HAS_TAG {
            has_tag: session.has_tag(),
        },
        NfcCommand::ReleaseTag => {
            session.clear();
            OutgoingMessage::HAS_TAG { has_tag: false }
        }
        NfcCommand::Read => {
            info!("Read requested");
            match session.read() {
                Ok(outcome) => OutgoingMessage::READ_RESULT(outcome),
                Err(e) => operation_error(Operation::Read, e),
            }
        }
        NfcCommand::Write { url, card_id } => {
            info!("Write requested - URL: {}", url);
            match session.write(&url, card_id) {
                Ok(outcome) => OutgoingMessage::WRITE_RESULT(outcome),
                Err(e) => operation_error(Operation::Write, e),
            }
        }
        NfcCommand::Clear => {
            info!("Clear requested");
            match session.clear_tag() {
                Ok(outcome) => OutgoingMessage::CLEAR_RESULT(outcome),
                Err(e) => operation_error(Operation::Clear, e),
            }
        }
    };

    let _ = tx.send(msg);
}

fn operation_error(operation: Operation, err: crate::error::NfcError) -> OutgoingMessage {
    error!("{:?} error: {}", operation, err);
    OutgoingMessage::OPERATION_ERROR {
        operation,
        error: err.to_string(),
    }
}
