// src/session.rs
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::error::{NfcError, Result};
use crate::ndef::{self, DecodedContent};
use crate::tag::{ConnectionGuard, NdefSupport, TagAccess};
use crate::types::{ClearOutcome, ReadOutcome, WriteOutcome};

/// Holds at most one detected tag and runs operations against it.
///
/// The slot lock is held for the whole of an operation, so a new detection
/// or a release waits until the tag I/O in flight is finished.
pub struct TagSession<A: TagAccess> {
    access: A,
    current: Mutex<Option<A::Handle>>,
}

impl<A: TagAccess> TagSession<A> {
    pub fn new(access: A) -> Self {
        Self {
            access,
            current: Mutex::new(None),
        }
    }

    #[cfg(test)]
    pub fn access(&self) -> &A {
        &self.access
    }

    /// Last detection wins: any previously held tag is dropped.
    pub fn on_tag_detected(&self, handle: A::Handle) {
        let previous = self.current.lock().replace(handle);
        if previous.is_some() {
            debug!("Replacing previously detected tag");
        }
    }

    pub fn clear(&self) {
        self.current.lock().take();
    }

    pub fn is_supported(&self) -> bool {
        self.access.is_available()
    }

    pub fn has_tag(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Reads the first record of the held tag. The tag stays held.
    pub fn read(&self) -> Result<ReadOutcome> {
        let slot = self.current.lock();
        let handle = slot.as_ref().ok_or(NfcError::NoTagPresent)?;

        let mut guard = ConnectionGuard::open(&self.access, handle)?;
        let content = match self.access.read_message(guard.conn())? {
            Some(message) => {
                if let Some(first) = message.first() {
                    debug!(
                        "NDEF message with {} record(s), first: tnf {:?}, type {:?}, id {:?}",
                        message.records().len(),
                        first.tnf(),
                        String::from_utf8_lossy(first.record_type()),
                        first.id().map(hex::encode)
                    );
                }
                ndef::decode_first_record(&message)?
            }
            None => {
                debug!("Tag is not NDEF formatted (might be blank)");
                DecodedContent::Absent
            }
        };
        drop(guard);

        if let DecodedContent::Raw(raw) = &content {
            if raw.text().is_err() {
                warn!(
                    "Raw record payload ({} bytes) is not valid UTF-8, returning a lossy copy",
                    raw.bytes().len()
                );
            }
        }

        let outcome = read_outcome(&content);
        info!("Read success: {:?}", outcome.content);
        Ok(outcome)
    }

    /// Writes `url` as a URI record. On success the tag is released and
    /// the next operation needs a fresh tap.
    pub fn write(&self, url: &str, card_id: Option<String>) -> Result<WriteOutcome> {
        let message = ndef::encode_uri(url)?;

        let mut slot = self.current.lock();
        let handle = slot.as_ref().ok_or(NfcError::NoTagPresent)?;

        let mut guard = ConnectionGuard::open(&self.access, handle)?;
        match self.access.ndef_support(guard.conn())? {
            NdefSupport::Ndef => {
                if !self.access.is_writable(guard.conn())? {
                    return Err(NfcError::NotWritable);
                }

                let capacity = self.access.capacity_bytes(guard.conn())?;
                let size = message.byte_len();
                if capacity < size {
                    return Err(NfcError::CapacityExceeded { capacity, size });
                }

                self.access.write_message(guard.conn(), &message)?;
                info!("Written to NDEF tag");
            }
            NdefSupport::Formatable => {
                self.access.format_and_write(guard.conn(), &message)?;
                info!("Formatted and written to tag");
            }
            NdefSupport::Unsupported => return Err(NfcError::UnsupportedTag),
        }
        drop(guard);

        slot.take();

        let card_id = card_id.or_else(|| ndef::card_id_from_content(url).map(str::to_owned));
        Ok(WriteOutcome {
            success: true,
            card_id,
            url: Some(url.to_owned()),
        })
    }

    /// Writes an empty record over the tag's content and releases the tag.
    pub fn clear_tag(&self) -> Result<ClearOutcome> {
        let mut slot = self.current.lock();
        let handle = slot.as_ref().ok_or(NfcError::NoTagPresent)?;

        let mut guard = ConnectionGuard::open(&self.access, handle)?;
        match self.access.ndef_support(guard.conn())? {
            NdefSupport::Ndef => {
                if !self.access.is_writable(guard.conn())? {
                    return Err(NfcError::NotWritable);
                }
                self.access.write_message(guard.conn(), &ndef::encode_empty())?;
            }
            NdefSupport::Formatable | NdefSupport::Unsupported => {
                return Err(NfcError::UnsupportedTag);
            }
        }
        drop(guard);

        slot.take();
        info!("Clear success");
        Ok(ClearOutcome { success: true })
    }
}

fn read_outcome(content: &DecodedContent) -> ReadOutcome {
    let text = content
        .as_string()
        .map(|text| text.into_owned())
        .unwrap_or_default();
    let card_id = ndef::card_id_from_content(&text).map(str::to_owned);

    ReadOutcome {
        success: true,
        has_data: !text.is_empty(),
        is_smart_valet_card: card_id.is_some(),
        card_id,
        content: text,
    }
}
