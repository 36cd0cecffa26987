// src/ndef.rs
use std::borrow::Cow;
use std::str::{self, Utf8Error};

use crate::error::{NfcError, Result};
use crate::uri_prefix::{prefix_for_code, split_uri};

// Record header flags
const FLAG_MB: u8 = 0x80; // Message Begin
const FLAG_ME: u8 = 0x40; // Message End
const FLAG_CF: u8 = 0x20; // Chunk Flag
const FLAG_SR: u8 = 0x10; // Short Record
const FLAG_IL: u8 = 0x08; // ID Length present

pub const RTD_URI: &[u8] = b"U";
pub const RTD_TEXT: &[u8] = b"T";

// Type 2 tag TLV blocks
pub const TLV_NULL: u8 = 0x00;
pub const TLV_NDEF: u8 = 0x03;
pub const TLV_TERMINATOR: u8 = 0xFE;

/// Type Name Format, the low 3 bits of the record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tnf {
    Empty,
    WellKnown,
    MimeMedia,
    AbsoluteUri,
    External,
    Unknown,
    Unchanged,
    Reserved,
}

impl Tnf {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => Tnf::Empty,
            1 => Tnf::WellKnown,
            2 => Tnf::MimeMedia,
            3 => Tnf::AbsoluteUri,
            4 => Tnf::External,
            5 => Tnf::Unknown,
            6 => Tnf::Unchanged,
            _ => Tnf::Reserved,
        }
    }

    fn bits(self) -> u8 {
        match self {
            Tnf::Empty => 0,
            Tnf::WellKnown => 1,
            Tnf::MimeMedia => 2,
            Tnf::AbsoluteUri => 3,
            Tnf::External => 4,
            Tnf::Unknown => 5,
            Tnf::Unchanged => 6,
            Tnf::Reserved => 7,
        }
    }
}

/// How the codec interprets a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Empty,
    WellKnownUri,
    WellKnownText,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdefRecord {
    tnf: Tnf,
    record_type: Vec<u8>,
    id: Option<Vec<u8>>,
    payload: Vec<u8>,
}

impl NdefRecord {
    /// Type and id lengths are single bytes on the wire.
    pub fn new(
        tnf: Tnf,
        record_type: Vec<u8>,
        id: Option<Vec<u8>>,
        payload: Vec<u8>,
    ) -> Result<Self> {
        if record_type.len() > u8::MAX as usize {
            return Err(NfcError::malformed("record type longer than 255 bytes"));
        }
        if id.as_ref().is_some_and(|id| id.len() > u8::MAX as usize) {
            return Err(NfcError::malformed("record id longer than 255 bytes"));
        }

        Ok(Self {
            tnf,
            record_type,
            id,
            payload,
        })
    }

    pub fn empty() -> Self {
        Self {
            tnf: Tnf::Empty,
            record_type: Vec::new(),
            id: None,
            payload: Vec::new(),
        }
    }

    pub fn tnf(&self) -> Tnf {
        self.tnf
    }

    pub fn record_type(&self) -> &[u8] {
        &self.record_type
    }

    pub fn id(&self) -> Option<&[u8]> {
        self.id.as_deref()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn kind(&self) -> RecordKind {
        match (self.tnf, self.record_type.as_slice()) {
            (Tnf::Empty, _) => RecordKind::Empty,
            (Tnf::WellKnown, RTD_URI) => RecordKind::WellKnownUri,
            (Tnf::WellKnown, RTD_TEXT) => RecordKind::WellKnownText,
            _ => RecordKind::Unknown,
        }
    }

    fn write_to(&self, out: &mut Vec<u8>, first: bool, last: bool) {
        let short = self.payload.len() <= u8::MAX as usize;

        let mut header = self.tnf.bits();
        if first {
            header |= FLAG_MB;
        }
        if last {
            header |= FLAG_ME;
        }
        if short {
            header |= FLAG_SR;
        }
        if self.id.is_some() {
            header |= FLAG_IL;
        }

        out.push(header);
        out.push(self.record_type.len() as u8);
        if short {
            out.push(self.payload.len() as u8);
        } else {
            out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        }
        if let Some(id) = &self.id {
            out.push(id.len() as u8);
        }
        out.extend_from_slice(&self.record_type);
        if let Some(id) = &self.id {
            out.extend_from_slice(id);
        }
        out.extend_from_slice(&self.payload);
    }
}

/// Ordered records; only the first one is interpreted by [`decode_first_record`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NdefMessage {
    records: Vec<NdefRecord>,
}

impl NdefMessage {
    pub fn new(records: Vec<NdefRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[NdefRecord] {
        &self.records
    }

    pub fn first(&self) -> Option<&NdefRecord> {
        self.records.first()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let last = self.records.len().saturating_sub(1);
        for (i, record) in self.records.iter().enumerate() {
            record.write_to(&mut out, i == 0, i == last);
        }
        out
    }

    /// Encoded size, as compared against a tag's capacity.
    pub fn byte_len(&self) -> usize {
        self.to_bytes().len()
    }

    /// Parses records until the ME flag or the end of `data`.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut cursor = ByteCursor::new(data);
        let mut records = Vec::new();

        while !cursor.is_empty() {
            let header = cursor.u8("record header")?;
            if header & FLAG_CF != 0 {
                return Err(NfcError::malformed("chunked records are not supported"));
            }

            let type_len = cursor.u8("type length")? as usize;
            let payload_len = if header & FLAG_SR != 0 {
                cursor.u8("payload length")? as usize
            } else {
                cursor.u32_be("payload length")? as usize
            };
            let id_len = if header & FLAG_IL != 0 {
                Some(cursor.u8("id length")? as usize)
            } else {
                None
            };

            let record_type = cursor.take(type_len, "record type")?.to_vec();
            let id = match id_len {
                Some(len) => Some(cursor.take(len, "record id")?.to_vec()),
                None => None,
            };
            let payload = cursor.take(payload_len, "payload")?.to_vec();

            records.push(NdefRecord {
                tnf: Tnf::from_bits(header),
                record_type,
                id,
                payload,
            });

            if header & FLAG_ME != 0 {
                break;
            }
        }

        Ok(Self { records })
    }
}

struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                NfcError::malformed(format!(
                    "{what} needs {len} bytes at offset {}, only {} left",
                    self.pos,
                    self.data.len() - self.pos
                ))
            })?;

        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn u32_be(&mut self, what: &str) -> Result<u32> {
        let bytes = self.take(4, what)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

/// Record payload that is neither URI nor text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawContent(Vec<u8>);

impl RawContent {
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    /// Fails when the payload is not valid UTF-8.
    pub fn text(&self) -> std::result::Result<&str, Utf8Error> {
        str::from_utf8(&self.0)
    }

    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedContent {
    Uri(String),
    Text(String),
    Raw(RawContent),
    /// No NDEF message, or a message without records
    Absent,
}

impl DecodedContent {
    /// The content as a client-facing string, `None` when absent.
    pub fn as_string(&self) -> Option<Cow<'_, str>> {
        match self {
            DecodedContent::Uri(uri) => Some(Cow::Borrowed(uri)),
            DecodedContent::Text(text) => Some(Cow::Borrowed(text)),
            DecodedContent::Raw(raw) => Some(raw.to_string_lossy()),
            DecodedContent::Absent => None,
        }
    }
}

pub fn decode_first_record(message: &NdefMessage) -> Result<DecodedContent> {
    let Some(record) = message.first() else {
        return Ok(DecodedContent::Absent);
    };

    let payload = record.payload();
    match record.kind() {
        RecordKind::WellKnownUri => {
            let (&code, rest) = payload
                .split_first()
                .ok_or_else(|| NfcError::malformed("URI record has an empty payload"))?;

            let mut uri = String::from(prefix_for_code(code));
            uri.push_str(&String::from_utf8_lossy(rest));
            Ok(DecodedContent::Uri(uri))
        }
        RecordKind::WellKnownText => {
            // Text Record: [Status Byte] + [Lang Code] + [Text]
            let &status = payload
                .first()
                .ok_or_else(|| NfcError::malformed("text record has an empty payload"))?;

            let lang_len = (status & 0x3F) as usize;
            let text_start = 1 + lang_len;
            if text_start > payload.len() {
                return Err(NfcError::malformed(format!(
                    "language code of {lang_len} bytes overruns a {} byte payload",
                    payload.len()
                )));
            }

            let text_bytes = &payload[text_start..];
            let text = if status & 0x80 != 0 {
                decode_utf16(text_bytes)
            } else {
                String::from_utf8_lossy(text_bytes).into_owned()
            };
            Ok(DecodedContent::Text(text))
        }
        RecordKind::Empty | RecordKind::Unknown => {
            Ok(DecodedContent::Raw(RawContent(payload.to_vec())))
        }
    }
}

// Big-endian unless a byte order mark says otherwise
fn decode_utf16(bytes: &[u8]) -> String {
    let (bytes, little_endian) = match bytes {
        [0xFE, 0xFF, rest @ ..] => (rest, false),
        [0xFF, 0xFE, rest @ ..] => (rest, true),
        _ => (bytes, false),
    };

    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| {
            if little_endian {
                u16::from_le_bytes([pair[0], pair[1]])
            } else {
                u16::from_be_bytes([pair[0], pair[1]])
            }
        })
        .collect();

    String::from_utf16_lossy(&units)
}

/// Single well-known URI record using the shortest payload the prefix table allows.
pub fn encode_uri(url: &str) -> Result<NdefMessage> {
    if url.is_empty() {
        return Err(NfcError::InvalidInput("URL is required".into()));
    }

    let (code, remainder) = split_uri(url);
    let mut payload = Vec::with_capacity(1 + remainder.len());
    payload.push(code);
    payload.extend_from_slice(remainder.as_bytes());

    let record = NdefRecord::new(Tnf::WellKnown, RTD_URI.to_vec(), None, payload)?;
    Ok(NdefMessage::new(vec![record]))
}

/// One empty record, written to erase a tag.
pub fn encode_empty() -> NdefMessage {
    NdefMessage::new(vec![NdefRecord::empty()])
}

pub fn wrap_in_tlv(ndef_bytes: &[u8]) -> Vec<u8> {
    let mut tlv = Vec::with_capacity(ndef_bytes.len() + 5);
    tlv.push(TLV_NDEF);

    if ndef_bytes.len() < 0xFF {
        tlv.push(ndef_bytes.len() as u8);
    } else {
        // 3-byte format: 0xFF followed by a big-endian u16
        tlv.push(0xFF);
        tlv.extend_from_slice(&(ndef_bytes.len() as u16).to_be_bytes());
    }

    tlv.extend_from_slice(ndef_bytes);
    tlv.push(TLV_TERMINATOR);
    tlv
}

/// Bytes `wrap_in_tlv` adds around a message of `ndef_len` bytes.
pub fn tlv_overhead(ndef_len: usize) -> usize {
    if ndef_len < 0xFF { 3 } else { 5 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlvLocation {
    /// NDEF value starts at `start` and is `len` bytes long
    Ndef { start: usize, len: usize },
    /// Terminator reached without an NDEF TLV
    Absent,
    /// Buffer ends before a TLV header could be read
    Truncated,
}

/// Walks the TLV blocks of a Type 2 tag data area.
pub fn locate_ndef_tlv(buf: &[u8]) -> TlvLocation {
    let mut pos = 0;

    while pos < buf.len() {
        let tag = buf[pos];
        match tag {
            TLV_NULL => {
                pos += 1;
                continue;
            }
            TLV_TERMINATOR => return TlvLocation::Absent,
            _ => {}
        }

        let Some((len, len_bytes)) = read_tlv_length(&buf[pos + 1..]) else {
            return TlvLocation::Truncated;
        };
        let start = pos + 1 + len_bytes;

        if tag == TLV_NDEF {
            return TlvLocation::Ndef { start, len };
        }

        // Lock control, memory control and proprietary TLVs are skipped
        pos = start + len;
    }

    TlvLocation::Truncated
}

fn read_tlv_length(buf: &[u8]) -> Option<(usize, usize)> {
    match *buf.first()? {
        0xFF => {
            let hi = *buf.get(1)?;
            let lo = *buf.get(2)?;
            Some((u16::from_be_bytes([hi, lo]) as usize, 3))
        }
        len => Some((len as usize, 1)),
    }
}

/// Card identifier: whatever follows the last "/v/" in the content.
pub fn card_id_from_content(content: &str) -> Option<&str> {
    content.rfind("/v/").map(|idx| &content[idx + 3..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri_record(code: u8, rest: &str) -> NdefMessage {
        let mut payload = vec![code];
        payload.extend_from_slice(rest.as_bytes());
        let record = NdefRecord::new(Tnf::WellKnown, RTD_URI.to_vec(), None, payload).unwrap();
        NdefMessage::new(vec![record])
    }

    fn text_record(payload: Vec<u8>) -> NdefMessage {
        let record = NdefRecord::new(Tnf::WellKnown, RTD_TEXT.to_vec(), None, payload).unwrap();
        NdefMessage::new(vec![record])
    }

    #[test]
    fn decodes_uri_with_prefix() {
        let message = uri_record(0x04, "example.com/v/42");
        assert_eq!(
            decode_first_record(&message).unwrap(),
            DecodedContent::Uri("https://example.com/v/42".into())
        );
    }

    #[test]
    fn unknown_prefix_code_decodes_without_prefix() {
        let message = uri_record(0x30, "example.com");
        assert_eq!(
            decode_first_record(&message).unwrap(),
            DecodedContent::Uri("example.com".into())
        );
    }

    #[test]
    fn empty_uri_payload_is_malformed() {
        let message = uri_record(0x00, "");
        let record = NdefRecord::new(Tnf::WellKnown, RTD_URI.to_vec(), None, vec![]).unwrap();
        assert!(decode_first_record(&message).is_ok());
        assert!(matches!(
            decode_first_record(&NdefMessage::new(vec![record])),
            Err(NfcError::MalformedRecord(_))
        ));
    }

    #[test]
    fn decodes_text_skipping_language() {
        let mut payload = vec![0x02];
        payload.extend_from_slice(b"enhello");
        assert_eq!(
            decode_first_record(&text_record(payload)).unwrap(),
            DecodedContent::Text("hello".into())
        );
    }

    #[test]
    fn text_language_overrun_is_malformed() {
        let payload = vec![0x05, b'e', b'n'];
        assert!(matches!(
            decode_first_record(&text_record(payload)),
            Err(NfcError::MalformedRecord(_))
        ));
        assert!(matches!(
            decode_first_record(&text_record(vec![])),
            Err(NfcError::MalformedRecord(_))
        ));
    }

    #[test]
    fn text_with_utf16_flag() {
        let mut payload = vec![0x80 | 0x02, b'e', b'n'];
        payload.extend_from_slice(&[0x00, b'h', 0x00, b'i']);
        assert_eq!(
            decode_first_record(&text_record(payload)).unwrap(),
            DecodedContent::Text("hi".into())
        );

        let mut payload = vec![0x80 | 0x02, b'e', b'n', 0xFF, 0xFE];
        payload.extend_from_slice(&[b'o', 0x00, b'k', 0x00]);
        assert_eq!(
            decode_first_record(&text_record(payload)).unwrap(),
            DecodedContent::Text("ok".into())
        );
    }

    #[test]
    fn other_records_decode_as_raw() {
        let record = NdefRecord::new(
            Tnf::MimeMedia,
            b"application/json".to_vec(),
            None,
            vec![0xC3, 0x28],
        )
        .unwrap();
        let decoded = decode_first_record(&NdefMessage::new(vec![record])).unwrap();

        let DecodedContent::Raw(raw) = &decoded else {
            panic!("expected raw content, got {decoded:?}");
        };
        assert!(raw.text().is_err());
        assert_eq!(raw.bytes(), &[0xC3, 0x28]);
        assert_eq!(decoded.as_string().unwrap(), "\u{FFFD}(");
    }

    #[test]
    fn no_records_is_absent() {
        assert_eq!(
            decode_first_record(&NdefMessage::default()).unwrap(),
            DecodedContent::Absent
        );
    }

    #[test]
    fn only_first_record_counts() {
        let first = NdefRecord::new(Tnf::WellKnown, RTD_URI.to_vec(), None, b"\x03a.b".to_vec())
            .unwrap();
        let second = NdefRecord::new(Tnf::WellKnown, RTD_URI.to_vec(), None, b"\x04c.d".to_vec())
            .unwrap();
        let message = NdefMessage::new(vec![first, second]);
        assert_eq!(
            decode_first_record(&message).unwrap(),
            DecodedContent::Uri("http://a.b".into())
        );
    }

    #[test]
    fn encode_uri_round_trips() {
        for url in [
            "https://valet.app/v/7",
            "https://www.example.com",
            "http://www.example.com/x",
            "http://example.com",
            "tel:+15551234",
            "mailto:desk@example.com",
            "ftp://files.example/readme",
            "valet-card-17",
        ] {
            let message = encode_uri(url).unwrap();
            assert_eq!(message.records().len(), 1);
            assert_eq!(message.first().unwrap().kind(), RecordKind::WellKnownUri);

            let parsed = NdefMessage::from_bytes(&message.to_bytes()).unwrap();
            assert_eq!(
                decode_first_record(&parsed).unwrap(),
                DecodedContent::Uri(url.into())
            );
        }
    }

    #[test]
    fn encode_uri_uses_prefix_code() {
        let message = encode_uri("https://valet.app/v/7").unwrap();
        assert_eq!(message.first().unwrap().payload(), b"\x04valet.app/v/7");

        // MB|ME|SR|TNF=1, type length 1, payload length 14, 'U'
        assert_eq!(&message.to_bytes()[..4], &[0xD1, 0x01, 0x0E, 0x55]);
    }

    #[test]
    fn encode_uri_rejects_empty() {
        assert_eq!(
            encode_uri(""),
            Err(NfcError::InvalidInput("URL is required".into()))
        );
    }

    #[test]
    fn empty_message_encoding() {
        let message = encode_empty();
        assert_eq!(message.records().len(), 1);
        assert_eq!(message.first().unwrap().kind(), RecordKind::Empty);
        assert_eq!(message.to_bytes(), vec![0xD0, 0x00, 0x00]);
    }

    #[test]
    fn parses_long_record_and_id() {
        let payload = vec![b'a'; 300];
        let record = NdefRecord::new(
            Tnf::External,
            b"valet.app:card".to_vec(),
            Some(b"id1".to_vec()),
            payload.clone(),
        )
        .unwrap();
        let bytes = NdefMessage::new(vec![record]).to_bytes();

        // long form: no SR flag, IL set
        assert_eq!(bytes[0], FLAG_MB | FLAG_ME | FLAG_IL | 0x04);

        let parsed = NdefMessage::from_bytes(&bytes).unwrap();
        let record = parsed.first().unwrap();
        assert_eq!(record.tnf(), Tnf::External);
        assert_eq!(record.id(), Some(&b"id1"[..]));
        assert_eq!(record.payload(), payload.as_slice());
    }

    #[test]
    fn truncated_bytes_are_malformed() {
        let bytes = encode_uri("https://valet.app/v/7").unwrap().to_bytes();
        for cut in [1, 2, 3, bytes.len() - 1] {
            assert!(
                matches!(
                    NdefMessage::from_bytes(&bytes[..cut]),
                    Err(NfcError::MalformedRecord(_))
                ),
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn chunked_records_are_rejected() {
        assert!(matches!(
            NdefMessage::from_bytes(&[0xB1, 0x01, 0x01, b'T', 0x00]),
            Err(NfcError::MalformedRecord(_))
        ));
    }

    #[test]
    fn parsing_stops_at_message_end() {
        let mut bytes = encode_empty().to_bytes();
        bytes.extend_from_slice(&[0x00, 0x00, 0xFE]);
        let parsed = NdefMessage::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.records().len(), 1);
    }

    #[test]
    fn tlv_wrapping() {
        assert_eq!(wrap_in_tlv(&[0xD0, 0x00, 0x00]), vec![0x03, 0x03, 0xD0, 0x00, 0x00, 0xFE]);

        let long = vec![0u8; 300];
        let tlv = wrap_in_tlv(&long);
        assert_eq!(&tlv[..4], &[0x03, 0xFF, 0x01, 0x2C]);
        assert_eq!(tlv.len(), long.len() + tlv_overhead(long.len()));
    }

    #[test]
    fn locates_ndef_after_other_tlvs() {
        // NULL, lock control TLV (3 bytes), then NDEF
        let data = [0x00, 0x01, 0x03, 0xA0, 0x0C, 0x34, 0x03, 0x03, 0xD0, 0x00, 0x00, 0xFE];
        assert_eq!(locate_ndef_tlv(&data), TlvLocation::Ndef { start: 8, len: 3 });

        assert_eq!(locate_ndef_tlv(&[0x00, 0xFE, 0x03]), TlvLocation::Absent);
        assert_eq!(locate_ndef_tlv(&[0x03]), TlvLocation::Truncated);
        assert_eq!(locate_ndef_tlv(&[0x03, 0xFF, 0x01]), TlvLocation::Truncated);
        assert_eq!(
            locate_ndef_tlv(&[0x03, 0xFF, 0x01, 0x2C]),
            TlvLocation::Ndef { start: 4, len: 300 }
        );
    }

    #[test]
    fn card_id_takes_last_segment() {
        assert_eq!(card_id_from_content("https://example.com/v/42"), Some("42"));
        assert_eq!(card_id_from_content("https://a/v/1/v/2"), Some("2"));
        assert_eq!(card_id_from_content("https://example.com/x"), None);
    }
}
