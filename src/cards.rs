// src/cards.rs
use std::ffi::{CStr, CString};
use std::time::{Duration, Instant};

use log::{debug, warn};
use pcsc::{Card, Context, Disposition, Protocols, ShareMode};

use crate::apdu;
use crate::error::{NfcError, Result};
use crate::ndef::{self, NdefMessage, TlvLocation};
use crate::tag::{NdefSupport, TagAccess};

// NFC Forum Type 2 tag layout (NTAG21x / Ultralight)
pub const CC_PAGE: u8 = 3;
pub const DATA_START_PAGE: u8 = 4;
const PAGE_SIZE: usize = 4;
const READ_CHUNK: u8 = 16; // READ returns 4 pages

const NDEF_MAGIC: u8 = 0xE1;
const NDEF_VERSION_1_0: u8 = 0x10;
const ACCESS_READ_WRITE: u8 = 0x00;

/// Page 3 of a Type 2 tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityContainer {
    pub magic: u8,
    pub version: u8,
    /// Data area in bytes (stored on the tag divided by 8)
    pub data_area: usize,
    pub write_access: u8,
}

impl CapabilityContainer {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        match bytes {
            [magic, version, size, access, ..] => Ok(Self {
                magic: *magic,
                version: *version,
                data_area: *size as usize * 8,
                write_access: *access,
            }),
            _ => Err(NfcError::connect("capability container read was short")),
        }
    }

    pub fn for_data_area(data_area: usize) -> Self {
        Self {
            magic: NDEF_MAGIC,
            version: NDEF_VERSION_1_0,
            data_area,
            write_access: ACCESS_READ_WRITE,
        }
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        [
            self.magic,
            self.version,
            (self.data_area / 8) as u8,
            self.write_access,
        ]
    }

    pub fn support(&self) -> NdefSupport {
        if self.magic == NDEF_MAGIC {
            NdefSupport::Ndef
        } else if self.to_bytes() == [0; 4] {
            NdefSupport::Formatable
        } else {
            NdefSupport::Unsupported
        }
    }

    pub fn is_writable(&self) -> bool {
        self.write_access == ACCESS_READ_WRITE
    }

    /// Largest NDEF message that fits with its TLV header and terminator.
    pub fn ndef_capacity(&self) -> usize {
        let short = self.data_area.saturating_sub(ndef::tlv_overhead(0));
        if short < 0xFF {
            short
        } else {
            self.data_area.saturating_sub(ndef::tlv_overhead(0xFF))
        }
    }

    fn fits(&self, message_len: usize) -> bool {
        message_len + ndef::tlv_overhead(message_len) <= self.data_area
    }
}

/// A tag as seen at detection time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcscTag {
    pub reader: CString,
    pub atr: Vec<u8>,
    pub uid: Vec<u8>,
}

/// Connects to whatever is on `reader` and records its identity.
pub fn identify(ctx: &Context, reader: &CStr) -> Result<PcscTag> {
    let card = ctx.connect(reader, ShareMode::Shared, Protocols::ANY)?;
    let identity = read_atr(&card).and_then(|atr| Ok((atr, apdu::get_uid(&card)?)));

    if let Err((_, err)) = card.disconnect(Disposition::LeaveCard) {
        warn!("Failed to disconnect from {:?}: {}", reader, err);
    }

    let (atr, uid) = identity?;
    Ok(PcscTag {
        reader: reader.to_owned(),
        atr,
        uid,
    })
}

fn read_atr(card: &Card) -> Result<Vec<u8>> {
    let mut names_buf = [0u8; 128];
    let mut atr_buf = [0u8; 64];
    let status = card.status2(&mut names_buf, &mut atr_buf)?;
    Ok(status.atr().to_vec())
}

pub struct PcscConnection {
    card: Option<Card>,
    deadline: Instant,
    timeout: Duration,
    cc: Option<CapabilityContainer>,
}

impl PcscConnection {
    fn card(&self) -> Result<&Card> {
        if Instant::now() > self.deadline {
            return Err(NfcError::connect(format!(
                "tag operation timed out after {:?}",
                self.timeout
            )));
        }
        self.card
            .as_ref()
            .ok_or_else(|| NfcError::connect("connection already closed"))
    }
}

/// Type 2 tags on a PC/SC reader.
pub struct PcscAccess {
    ctx: Option<Context>,
    timeout: Duration,
    format_data_area: usize,
}

impl PcscAccess {
    pub fn new(ctx: Option<Context>, timeout: Duration, format_data_area: usize) -> Self {
        Self {
            ctx,
            timeout,
            format_data_area,
        }
    }

    fn capability_container(&self, conn: &mut PcscConnection) -> Result<CapabilityContainer> {
        if let Some(cc) = conn.cc {
            return Ok(cc);
        }

        let data = apdu::read_binary(conn.card()?, CC_PAGE, READ_CHUNK)?;
        let cc = CapabilityContainer::parse(&data)?;
        debug!("Capability container: {:02X?}", cc.to_bytes());
        conn.cc = Some(cc);
        Ok(cc)
    }

    // Hands the connection back, or closes it and returns the failure
    fn keep_or_close(
        &self,
        mut conn: PcscConnection,
        checked: Result<()>,
    ) -> Result<PcscConnection> {
        match checked {
            Ok(()) => Ok(conn),
            Err(err) => {
                if let Err(close_err) = self.close(&mut conn) {
                    warn!("Failed to close tag connection: {}", close_err);
                }
                Err(err)
            }
        }
    }

    fn write_data_area(&self, conn: &PcscConnection, data: &[u8]) -> Result<()> {
        // Pad to a multiple of 4 (one page)
        let mut padded = data.to_vec();
        padded.resize(data.len().div_ceil(PAGE_SIZE) * PAGE_SIZE, 0x00);

        for (i, chunk) in padded.chunks(PAGE_SIZE).enumerate() {
            let page = page_at(i * PAGE_SIZE)?;
            apdu::update_binary(conn.card()?, page, chunk)?;
        }
        Ok(())
    }
}

// Page address of a data-area byte offset
fn page_at(offset: usize) -> Result<u8> {
    u8::try_from(DATA_START_PAGE as usize + offset / PAGE_SIZE)
        .map_err(|_| NfcError::connect("data area exceeds addressable pages"))
}

/// Walks the TLVs of the data area, fetching `READ_CHUNK` bytes at a time
/// through `read_page`, until the NDEF TLV is complete.
fn read_ndef_area(
    cc: &CapabilityContainer,
    mut read_page: impl FnMut(u8) -> Result<Vec<u8>>,
) -> Result<Option<NdefMessage>> {
    let mut buf = Vec::new();
    let mut read_chunk = |buf: &mut Vec<u8>| -> Result<()> {
        let chunk = read_page(page_at(buf.len())?)?;
        if chunk.is_empty() {
            return Err(NfcError::connect("tag returned no data"));
        }
        buf.extend(chunk);
        Ok(())
    };

    loop {
        match ndef::locate_ndef_tlv(&buf) {
            TlvLocation::Ndef { start, len } => {
                let end = start + len;
                if end > cc.data_area {
                    return Err(NfcError::malformed("NDEF TLV runs past the data area"));
                }
                while buf.len() < end {
                    read_chunk(&mut buf)?;
                }
                return NdefMessage::from_bytes(&buf[start..end]).map(Some);
            }
            TlvLocation::Absent => return Ok(None),
            TlvLocation::Truncated if buf.len() >= cc.data_area => return Ok(None),
            TlvLocation::Truncated => read_chunk(&mut buf)?,
        }
    }
}

impl TagAccess for PcscAccess {
    type Handle = PcscTag;
    type Connection = PcscConnection;

    fn is_available(&self) -> bool {
        self.ctx.as_ref().is_some_and(|ctx| ctx.is_valid().is_ok())
    }

    fn connect(&self, handle: &PcscTag) -> Result<PcscConnection> {
        let ctx = self
            .ctx
            .as_ref()
            .ok_or_else(|| NfcError::connect("PC/SC context not established"))?;

        let deadline = Instant::now() + self.timeout;
        let card = ctx.connect(&handle.reader, ShareMode::Shared, Protocols::ANY)?;
        let conn = PcscConnection {
            card: Some(card),
            deadline,
            timeout: self.timeout,
            cc: None,
        };

        // The slot may hold a tag that has since been swapped on the reader
        let checked = conn.card().and_then(apdu::get_uid).and_then(|uid| {
            if uid == handle.uid {
                Ok(())
            } else {
                Err(NfcError::connect(
                    "detected tag is no longer on the reader, please tap again",
                ))
            }
        });

        self.keep_or_close(conn, checked)
    }

    fn ndef_support(&self, conn: &mut PcscConnection) -> Result<NdefSupport> {
        Ok(self.capability_container(conn)?.support())
    }

    fn read_message(&self, conn: &mut PcscConnection) -> Result<Option<NdefMessage>> {
        let cc = self.capability_container(conn)?;
        if cc.support() != NdefSupport::Ndef {
            return Ok(None);
        }

        read_ndef_area(&cc, |page| apdu::read_binary(conn.card()?, page, READ_CHUNK))
    }

    fn is_writable(&self, conn: &mut PcscConnection) -> Result<bool> {
        Ok(self.capability_container(conn)?.is_writable())
    }

    fn capacity_bytes(&self, conn: &mut PcscConnection) -> Result<usize> {
        Ok(self.capability_container(conn)?.ndef_capacity())
    }

    fn write_message(&self, conn: &mut PcscConnection, message: &NdefMessage) -> Result<()> {
        let cc = self.capability_container(conn)?;
        let bytes = message.to_bytes();
        if !cc.fits(bytes.len()) {
            return Err(NfcError::CapacityExceeded {
                capacity: cc.ndef_capacity(),
                size: bytes.len(),
            });
        }

        self.write_data_area(conn, &ndef::wrap_in_tlv(&bytes))
    }

    fn format_and_write(&self, conn: &mut PcscConnection, message: &NdefMessage) -> Result<()> {
        if self.capability_container(conn)?.support() != NdefSupport::Formatable {
            return Err(NfcError::UnsupportedTag);
        }

        let cc = CapabilityContainer::for_data_area(self.format_data_area);
        let bytes = message.to_bytes();
        if !cc.fits(bytes.len()) {
            return Err(NfcError::CapacityExceeded {
                capacity: cc.ndef_capacity(),
                size: bytes.len(),
            });
        }

        apdu::update_binary(conn.card()?, CC_PAGE, &cc.to_bytes())?;
        conn.cc = Some(cc);
        self.write_data_area(conn, &ndef::wrap_in_tlv(&bytes))
    }

    fn close(&self, conn: &mut PcscConnection) -> Result<()> {
        match conn.card.take() {
            Some(card) => card
                .disconnect(Disposition::LeaveCard)
                .map_err(|(_, err)| err.into()),
            None => Ok(()),
        }
    }
}
