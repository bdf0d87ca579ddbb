//! JEDEC identification bytes

use crate::protocol::Advisory;
use std::fmt;

/// Extended-length value that marks a failed ID read
pub const EXTENDED_LEN_INVALID: u8 = 0xFF;

/// Raw JEDEC identification bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JedecId {
    /// Manufacturer ID
    pub manufacturer: u8,
    /// Memory type and capacity bytes
    pub device: [u8; 2],
    /// Advertised number of extended ID bytes
    pub extended_len: u8,
    /// Extended ID bytes actually read
    pub extended: Vec<u8>,
}

impl JedecId {
    /// Build an ID from the four header bytes
    pub fn from_header(header: [u8; 4]) -> Self {
        JedecId {
            manufacturer: header[0],
            device: [header[1], header[2]],
            extended_len: header[3],
            extended: Vec::new(),
        }
    }

    /// All bytes in the order they were received
    pub fn bytes(&self) -> Vec<u8> {
        let mut out = vec![
            self.manufacturer,
            self.device[0],
            self.device[1],
            self.extended_len,
        ];
        out.extend_from_slice(&self.extended);
        out
    }

    /// Advisory raised by this read, if any
    pub fn advisory(&self) -> Option<Advisory> {
        (self.extended_len == EXTENDED_LEN_INVALID).then_some(Advisory::ExtendedIdUnreadable)
    }
}

impl fmt::Display for JedecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.bytes();
        for (i, b) in bytes.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "0x{:02X}", b)?;
        }
        Ok(())
    }
}
