//! Non-fatal protocol conditions
//!
//! Advisories are logged as warnings and collected in the run report.

use crate::spi::StatusRegister;
use std::fmt;

/// A protocol condition worth reporting that does not stop the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advisory {
    /// The JEDEC extended-length byte read back as 0xFF, so the extended
    /// ID bytes were not read
    ExtendedIdUnreadable,
    /// The status register still had bits set after writing zero to it
    ProtectionNotCleared {
        /// Status register value read back
        status: StatusRegister,
    },
}

impl Advisory {
    /// Emit the advisory through the log facade
    pub fn log(&self) {
        log::warn!("{}", self);
    }
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::ExtendedIdUnreadable => write!(
                f,
                "Extended device string length is 0xFF, this is likely a read error. Ignoring..."
            ),
            Advisory::ProtectionNotCleared { status } => write!(
                f,
                "Failed to disable protection, SR now equal to {} (expected 0x00)",
                status
            ),
        }
    }
}
