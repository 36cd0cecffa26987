// src/error.rs
use thiserror::Error;

pub type Result<T, E = NfcError> = std::result::Result<T, E>;

// Display strings are sent to clients verbatim as the rejection message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NfcError {
    #[error("No NFC tag detected. Please tap a card.")]
    NoTagPresent,

    #[error("Malformed NDEF record: {0}")]
    MalformedRecord(String),

    #[error("Tag is read-only")]
    NotWritable,

    #[error("Tag capacity is {capacity} bytes, message is {size} bytes")]
    CapacityExceeded { capacity: usize, size: usize },

    #[error("Tag doesn't support NDEF")]
    UnsupportedTag,

    #[error("{0}")]
    InvalidInput(String),

    #[error("Tag connection error: {0}")]
    ConnectError(String),
}

impl NfcError {
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::MalformedRecord(detail.into())
    }

    pub fn connect(detail: impl Into<String>) -> Self {
        Self::ConnectError(detail.into())
    }
}

impl From<pcsc::Error> for NfcError {
    fn from(err: pcsc::Error) -> Self {
        Self::ConnectError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_client_readable() {
        assert_eq!(
            NfcError::NoTagPresent.to_string(),
            "No NFC tag detected. Please tap a card."
        );
        assert_eq!(
            NfcError::CapacityExceeded {
                capacity: 4,
                size: 30
            }
            .to_string(),
            "Tag capacity is 4 bytes, message is 30 bytes"
        );
        assert_eq!(
            NfcError::InvalidInput("URL is required".into()).to_string(),
            "URL is required"
        );
    }

    #[test]
    fn pcsc_errors_become_connect_errors() {
        let err: NfcError = pcsc::Error::NoSmartcard.into();
        assert!(matches!(err, NfcError::ConnectError(_)));
    }
}
