//! Error types for FTDI transport

use std::fmt;

use iceprog_core::Error as CoreError;

/// Result type for FTDI operations
pub type Result<T> = std::result::Result<T, FtdiError>;

/// Errors that can occur during FTDI operations
#[derive(Debug)]
pub enum FtdiError {
    /// No FTDI device found
    DeviceNotFound(String),

    /// Failed to configure device
    ConfigFailed(String),

    /// USB transfer failed
    TransferFailed(String),

    /// No data arrived within the read deadline
    ReadStalled {
        /// Bytes expected
        expected: usize,
        /// Bytes received before giving up
        received: usize,
    },

    /// Invalid channel/port specification
    InvalidChannel(String),

    /// Invalid parameter
    InvalidParameter(String),

    /// Device already closed
    Closed,

    /// libftdi error
    LibFtdi(String),
}

impl fmt::Display for FtdiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FtdiError::DeviceNotFound(s) => write!(f, "Can't find iCE FTDI USB device ({})", s),
            FtdiError::ConfigFailed(s) => write!(f, "Failed to configure device: {}", s),
            FtdiError::TransferFailed(s) => write!(f, "USB transfer failed: {}", s),
            FtdiError::ReadStalled { expected, received } => write!(
                f,
                "Read stalled: received {} of {} bytes",
                received, expected
            ),
            FtdiError::InvalidChannel(s) => write!(f, "Invalid channel: {}", s),
            FtdiError::InvalidParameter(s) => write!(f, "Invalid parameter: {}", s),
            FtdiError::Closed => write!(f, "Device is closed"),
            FtdiError::LibFtdi(s) => write!(f, "libftdi error: {}", s),
        }
    }
}

impl std::error::Error for FtdiError {}

impl From<ftdi::Error> for FtdiError {
    fn from(e: ftdi::Error) -> Self {
        FtdiError::LibFtdi(e.to_string())
    }
}

impl From<FtdiError> for CoreError {
    fn from(e: FtdiError) -> Self {
        match e {
            FtdiError::DeviceNotFound(_) => CoreError::DeviceNotFound(e.to_string()),
            FtdiError::InvalidChannel(_) | FtdiError::InvalidParameter(_) => {
                CoreError::Configuration(e.to_string())
            }
            _ => CoreError::TransportIo(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_classes() {
        let e: CoreError = FtdiError::DeviceNotFound("0403:6010".into()).into();
        assert_eq!(e.exit_code(), 2);

        let e: CoreError = FtdiError::InvalidChannel("E".into()).into();
        assert_eq!(e.exit_code(), 1);

        let e: CoreError = FtdiError::ReadStalled {
            expected: 4,
            received: 1,
        }
        .into();
        assert!(matches!(e, CoreError::TransportIo(_)));
        assert_eq!(e.exit_code(), 2);
    }
}
