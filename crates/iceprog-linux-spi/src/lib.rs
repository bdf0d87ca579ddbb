//! iceprog-linux-spi - Linux spidev transport
//!
//! This crate drives an iCE40 board wired directly to a single-board
//! computer: SPI data through `/dev/spidevX.Y`, and the reset, chip-select
//! and configuration-done lines through a GPIO character device.
//!
//! The spidev chip-select is not used: the flash select line is an
//! ordinary GPIO so it can stay asserted across several ioctl calls.
//!
//! # Usage with iceprog CLI
//!
//! ```bash
//! # Read the flash ID on a Raspberry Pi with default wiring
//! iceprog -t -p linux_spi
//!
//! # Custom wiring
//! iceprog -p linux_spi:dev=/dev/spidev1.0,gpiochip=0,reset=24,select=25,done=23 top.bin
//! ```
//!
//! # System Requirements
//!
//! - Linux kernel with spidev support enabled (`CONFIG_SPI_SPIDEV`)
//! - Read/write access to `/dev/spidevX.Y` and `/dev/gpiochipN`

pub mod device;
pub mod error;
pub mod gpio;

// Re-exports
pub use device::{mode, parse_options, LinuxSpi, LinuxSpiConfig};
pub use error::{LinuxSpiError, Result};
pub use gpio::GpioLines;
