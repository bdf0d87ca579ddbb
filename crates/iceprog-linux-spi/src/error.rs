//! Error types for Linux SPI operations

use iceprog_core::Error as CoreError;
use thiserror::Error;

/// Linux SPI specific errors
#[derive(Debug, Error)]
pub enum LinuxSpiError {
    /// Failed to open device
    #[error("Failed to open {path}: {source}")]
    OpenFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to set SPI mode
    #[error("Failed to set SPI mode to {mode}: {source}")]
    SetModeFailed {
        mode: u8,
        #[source]
        source: std::io::Error,
    },

    /// Failed to set bit order
    #[error("Failed to set LSB-first to {lsb_first}: {source}")]
    SetLsbFirstFailed {
        lsb_first: u8,
        #[source]
        source: std::io::Error,
    },

    /// Failed to set bits per word
    #[error("Failed to set bits per word to {bits}: {source}")]
    SetBitsPerWordFailed {
        bits: u8,
        #[source]
        source: std::io::Error,
    },

    /// Failed to set clock speed
    #[error("Failed to set clock speed to {speed} Hz: {source}")]
    SetSpeedFailed {
        speed: u32,
        #[source]
        source: std::io::Error,
    },

    /// Failed to read back a setting
    #[error("Failed to read {setting}: {source}")]
    ReadSettingFailed {
        setting: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// SPI transfer failed
    #[error("SPI transfer failed: {0}")]
    TransferFailed(#[source] std::io::Error),

    /// Failed to request GPIO lines
    #[error("Failed to request GPIO lines on {chip}: {source}")]
    LineRequestFailed {
        chip: String,
        #[source]
        source: gpiocdev::Error,
    },

    /// Failed to set GPIO line value
    #[error("Failed to set GPIO line value: {0}")]
    SetValueFailed(#[source] gpiocdev::Error),

    /// Failed to get GPIO line value
    #[error("Failed to get GPIO line value: {0}")]
    GetValueFailed(#[source] gpiocdev::Error),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Device already closed
    #[error("Device is closed")]
    Closed,
}

/// Result type for Linux SPI operations
pub type Result<T> = std::result::Result<T, LinuxSpiError>;

impl From<LinuxSpiError> for CoreError {
    fn from(e: LinuxSpiError) -> Self {
        match e {
            LinuxSpiError::OpenFailed { .. } | LinuxSpiError::LineRequestFailed { .. } => {
                CoreError::DeviceNotFound(e.to_string())
            }
            LinuxSpiError::InvalidParameter(_) => CoreError::Configuration(e.to_string()),
            _ => CoreError::TransportIo(e.to_string()),
        }
    }
}
