//! Error types for iceprog-core
//!
//! Every fallible operation in the library returns [`Error`]. Each variant
//! belongs to one [`ExitClass`], which is what the binary hands to
//! [`Transport::fail`](crate::Transport::fail) when a run has to be aborted.

use std::fmt;
use std::io;

/// Process exit status classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    /// Run completed
    Success,
    /// Non-hardware failure (bad arguments, configuration, file I/O)
    Failure,
    /// Transport or communication failure
    Hardware,
    /// Flash contents did not match the input
    VerifyMismatch,
}

impl ExitClass {
    /// Numeric process exit code for this class
    pub fn code(self) -> i32 {
        match self {
            ExitClass::Success => 0,
            ExitClass::Failure => 1,
            ExitClass::Hardware => 2,
            ExitClass::VerifyMismatch => 3,
        }
    }
}

/// Core error type
#[derive(Debug)]
pub enum Error {
    // Transport errors
    /// Bad transport parameters or programmer string
    Configuration(String),
    /// No matching device could be opened
    DeviceNotFound(String),
    /// Short write, failed ioctl, GPIO access failure or stalled read
    TransportIo(String),
    /// Operation cannot be expressed on the active transport
    Unsupported(&'static str),
    /// Flash stayed busy past the configured wait budget
    Timeout,

    // Caller errors, caught before anything is sent
    /// Address does not fit in 24 bits
    InvalidAddress(u32),
    /// Erase address is not aligned to a 64 KiB sector
    InvalidAlignment(u32),
    /// Program payload is empty, longer than a page or crosses a page boundary
    PageOverflow {
        /// Start address of the rejected payload
        addr: u32,
        /// Payload length in bytes
        len: usize,
    },

    // Data errors
    /// Flash contents differ from the expected data
    VerificationMismatch {
        /// Flash address of the first differing byte
        addr: u32,
        /// Byte from the input
        expected: u8,
        /// Byte read back from flash
        found: u8,
    },
    /// Source or sink I/O failed
    Io(io::Error),
}

impl Error {
    /// The exit status class this error maps to
    pub fn exit_class(&self) -> ExitClass {
        match self {
            Error::Configuration(_)
            | Error::InvalidAddress(_)
            | Error::InvalidAlignment(_)
            | Error::PageOverflow { .. }
            | Error::Io(_) => ExitClass::Failure,
            Error::DeviceNotFound(_)
            | Error::TransportIo(_)
            | Error::Unsupported(_)
            | Error::Timeout => ExitClass::Hardware,
            Error::VerificationMismatch { .. } => ExitClass::VerifyMismatch,
        }
    }

    /// Shorthand for `self.exit_class().code()`
    pub fn exit_code(&self) -> i32 {
        self.exit_class().code()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "invalid configuration: {}", msg),
            Self::DeviceNotFound(msg) => write!(f, "device not found: {}", msg),
            Self::TransportIo(msg) => write!(f, "transport I/O error: {}", msg),
            Self::Unsupported(what) => write!(f, "{} is not supported by this transport", what),
            Self::Timeout => write!(f, "timed out waiting for flash to become ready"),
            Self::InvalidAddress(addr) => {
                write!(f, "address 0x{:08X} does not fit in 24 bits", addr)
            }
            Self::InvalidAlignment(addr) => {
                write!(f, "address 0x{:06X} is not 64 KiB aligned", addr)
            }
            Self::PageOverflow { addr, len } => write!(
                f,
                "{} bytes at 0x{:06X} do not fit in a single 256-byte page",
                len, addr
            ),
            Self::VerificationMismatch {
                addr,
                expected,
                found,
            } => write!(
                f,
                "verification failed at 0x{:06X}: expected 0x{:02X}, found 0x{:02X}",
                addr, expected, found
            ),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// Result type alias using the core Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitClass::Success.code(), 0);
        assert_eq!(Error::Configuration("x".into()).exit_code(), 1);
        assert_eq!(Error::Io(io::Error::other("x")).exit_code(), 1);
        assert_eq!(Error::PageOverflow { addr: 0, len: 300 }.exit_code(), 1);
        assert_eq!(Error::TransportIo("x".into()).exit_code(), 2);
        assert_eq!(Error::DeviceNotFound("x".into()).exit_code(), 2);
        assert_eq!(Error::Unsupported("bits").exit_code(), 2);
        assert_eq!(Error::Timeout.exit_code(), 2);
        let mismatch = Error::VerificationMismatch {
            addr: 5,
            expected: 0x12,
            found: 0x34,
        };
        assert_eq!(mismatch.exit_code(), 3);
    }

    #[test]
    fn test_mismatch_message() {
        let e = Error::VerificationMismatch {
            addr: 0x105,
            expected: 0xAA,
            found: 0x55,
        };
        assert_eq!(
            e.to_string(),
            "verification failed at 0x000105: expected 0xAA, found 0x55"
        );
    }
}
