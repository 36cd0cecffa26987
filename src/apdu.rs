// src/apdu.rs
use pcsc::Card;

use crate::error::{NfcError, Result};

// Pseudo-APDUs understood by ACR122U-class readers for Type 2 tags

fn transmit(card: &Card, apdu: &[u8], op: &str) -> Result<Vec<u8>> {
    let mut recv_buffer = [0u8; 258];
    let resp = card.transmit(apdu, &mut recv_buffer)?;

    // 0x90 0x00 is Success
    match resp {
        [data @ .., 0x90, 0x00] => Ok(data.to_vec()),
        _ => Err(NfcError::connect(format!("{op} failed: {:02X?}", resp))),
    }
}

// Get Data: FF CA 00 00 00 (UID)
pub fn get_uid(card: &Card) -> Result<Vec<u8>> {
    transmit(card, &[0xFF, 0xCA, 0x00, 0x00, 0x00], "Get UID")
}

// Read: FF B0 00 Page Len (16 bytes = 4 pages on Type 2 tags)
pub fn read_binary(card: &Card, page: u8, length: u8) -> Result<Vec<u8>> {
    let data = transmit(card, &[0xFF, 0xB0, 0x00, page, length], "Read")?;
    if data.len() < length as usize {
        return Err(NfcError::connect(format!(
            "Read returned {} bytes, expected {}",
            data.len(),
            length
        )));
    }
    Ok(data)
}

// Write: FF D6 00 Page Len [Data]
pub fn update_binary(card: &Card, page: u8, data: &[u8]) -> Result<()> {
    let mut apdu = vec![0xFF, 0xD6, 0x00, page, data.len() as u8];
    apdu.extend_from_slice(data);

    transmit(card, &apdu, "Write").map(|_| ())
}
