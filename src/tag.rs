// src/tag.rs
use log::warn;

use crate::error::Result;
use crate::ndef::NdefMessage;

/// What a connected tag offers for NDEF operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NdefSupport {
    /// Already NDEF formatted
    Ndef,
    /// Blank, can be formatted on first write
    Formatable,
    Unsupported,
}

/// Platform access to a physically present tag.
///
/// Every successful `connect` is paired with exactly one `close`; callers go
/// through [`ConnectionGuard`] rather than calling `close` themselves.
pub trait TagAccess {
    type Handle;
    type Connection;

    /// Whether the NFC stack behind this access is initialized.
    fn is_available(&self) -> bool;

    fn connect(&self, handle: &Self::Handle) -> Result<Self::Connection>;

    fn ndef_support(&self, conn: &mut Self::Connection) -> Result<NdefSupport>;

    /// `None` when the tag holds no NDEF message (blank or not NDEF formatted).
    fn read_message(&self, conn: &mut Self::Connection) -> Result<Option<NdefMessage>>;

    fn is_writable(&self, conn: &mut Self::Connection) -> Result<bool>;

    /// Largest NDEF message, in bytes, the tag can hold.
    fn capacity_bytes(&self, conn: &mut Self::Connection) -> Result<usize>;

    fn write_message(&self, conn: &mut Self::Connection, message: &NdefMessage) -> Result<()>;

    /// Formats a blank tag and writes `message` as its first content.
    fn format_and_write(&self, conn: &mut Self::Connection, message: &NdefMessage)
    -> Result<()>;

    fn close(&self, conn: &mut Self::Connection) -> Result<()>;
}

/// Open connection that is closed when dropped, including on error paths.
pub struct ConnectionGuard<'a, A: TagAccess> {
    access: &'a A,
    conn: A::Connection,
}

impl<'a, A: TagAccess> ConnectionGuard<'a, A> {
    pub fn open(access: &'a A, handle: &A::Handle) -> Result<Self> {
        let conn = access.connect(handle)?;
        Ok(Self { access, conn })
    }

    pub fn conn(&mut self) -> &mut A::Connection {
        &mut self.conn
    }
}

impl<A: TagAccess> Drop for ConnectionGuard<'_, A> {
    fn drop(&mut self) {
        if let Err(e) = self.access.close(&mut self.conn) {
            warn!("Failed to close tag connection: {}", e);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mock::{MockAccess, MockTag};
    use super::*;
    use crate::error::NfcError;

    #[test]
    fn guard_closes_on_drop() {
        let access = MockAccess::with_tag(1, MockTag::ndef(64));
        {
            let mut guard = ConnectionGuard::open(&access, &1).unwrap();
            assert_eq!(access.read_message(guard.conn()).unwrap(), None);
        }
        assert_eq!(access.connects(), 1);
        assert_eq!(access.closes(), 1);
    }

    #[test]
    fn failed_connect_needs_no_close() {
        let access = MockAccess::default();
        let result = ConnectionGuard::open(&access, &9);
        assert!(matches!(result, Err(NfcError::ConnectError(_))));
        drop(result);
        assert_eq!(access.connects(), 0);
        assert_eq!(access.closes(), 0);
    }
}
