//! Status register bits

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Status register 1 snapshot
    ///
    /// Bit names follow the Atmel/Adesto convention used by the flashes
    /// found on iCE40 boards. Only BUSY and WEL have a fixed meaning across
    /// vendors.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatusRegister: u8 {
        /// Write/erase in progress
        const BUSY = 1 << 0;
        /// Write enable latch
        const WEL  = 1 << 1;
        /// Software protection status, low bit
        const SWP0 = 1 << 2;
        /// Software protection status, high bit
        const SWP1 = 1 << 3;
        /// Level of the ~WP pin (set when deasserted)
        const WPP  = 1 << 4;
        /// Erase/program error
        const EPE  = 1 << 5;
        /// Sequential program mode
        const SPM  = 1 << 6;
        /// Sector protection registers locked
        const SPRL = 1 << 7;

        /// Both software protection bits
        const SWP = Self::SWP0.bits() | Self::SWP1.bits();
    }
}

impl StatusRegister {
    /// Whether an internal write or erase is still running
    pub fn is_busy(self) -> bool {
        self.contains(StatusRegister::BUSY)
    }

    /// Human-readable description of each field
    pub fn describe(self) -> [&'static str; 7] {
        [
            if self.contains(Self::SPRL) {
                "Sector protection registers locked"
            } else {
                "Sector protection registers unlocked"
            },
            if self.contains(Self::SPM) {
                "Sequential program mode"
            } else {
                "Byte/page program mode"
            },
            if self.contains(Self::EPE) {
                "Erase or program error"
            } else {
                "Erase or program successful"
            },
            if self.contains(Self::WPP) {
                "~WP pin deasserted"
            } else {
                "~WP pin asserted"
            },
            match (self & Self::SWP).bits() >> 2 {
                0 => "All sectors unprotected",
                1 => "Some sectors protected",
                2 => "Reserved software protection state",
                _ => "All sectors protected",
            },
            if self.contains(Self::WEL) {
                "Write enabled"
            } else {
                "Not write enabled"
            },
            if self.is_busy() {
                "Busy"
            } else {
                "Ready"
            },
        ]
    }

    /// Log every decoded field at debug level
    pub fn log_decoded(self) {
        log::debug!("SR1: 0x{:02X}", self.bits());
        for line in self.describe() {
            log::debug!(" - {}", line);
        }
    }
}

impl From<u8> for StatusRegister {
    fn from(value: u8) -> Self {
        StatusRegister::from_bits_retain(value)
    }
}

impl fmt::Display for StatusRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.bits())
    }
}
