// src/types.rs
#![allow(non_camel_case_types)]

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadOutcome {
    pub success: bool,
    pub content: String,
    pub has_data: bool,
    pub is_smart_valet_card: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_id: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WriteOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ClearOutcome {
    pub success: bool,
}

// Messages sent TO the WebSocket client (Frontend)
#[derive(Serialize, Clone, Debug)]
#[serde(tag = "type")]
pub enum OutgoingMessage {
    READER_STATUS { success: bool },
    SUPPORTED { supported: bool },
    HAS_TAG { #[serde(rename = "hasTag")] has_tag: bool },
    TAG_DETECTED { reader: String, atr: String },
    TAG_REMOVED { reader: String },
    READ_RESULT(ReadOutcome),
    WRITE_RESULT(WriteOutcome),
    CLEAR_RESULT(ClearOutcome),
    OPERATION_ERROR { operation: Operation, error: String },
    READER_ERROR { error: String },
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Write,
    Clear,
}

// Messages received FROM the WebSocket client
#[derive(Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum IncomingMessage {
    GET_READER_STATUS,
    IS_SUPPORTED,
    HAS_TAG,
    READ,
    WRITE {
        // missing or null is rejected later with "URL is required"
        #[serde(default)]
        url: Option<String>,
        #[serde(default, rename = "cardId")]
        card_id: Option<String>,
    },
    CLEAR,
    RELEASE_TAG,
}

// Internal commands sent from WS Server -> NFC Thread
#[derive(Debug, PartialEq, Eq)]
pub enum NfcCommand {
    CheckReaderStatus,
    IsSupported,
    HasTag,
    Read,
    Write { url: String, card_id: Option<String> },
    Clear,
    ReleaseTag,
}

impl From<IncomingMessage> for NfcCommand {
    fn from(msg: IncomingMessage) -> Self {
        match msg {
            IncomingMessage::GET_READER_STATUS => NfcCommand::CheckReaderStatus,
            IncomingMessage::IS_SUPPORTED => NfcCommand::IsSupported,
            IncomingMessage::HAS_TAG => NfcCommand::HasTag,
            IncomingMessage::READ => NfcCommand::Read,
            IncomingMessage::WRITE { url, card_id } => NfcCommand::Write {
                url: url.unwrap_or_default(),
                card_id,
            },
            IncomingMessage::CLEAR => NfcCommand::Clear,
            IncomingMessage::RELEASE_TAG => NfcCommand::ReleaseTag,
        }
    }
}
