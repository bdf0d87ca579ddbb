//! iceprog-ftdi - FTDI MPSSE transport
//!
//! This crate drives an iCE40 board through the MPSSE engine of an FTDI
//! FT2232H or FT232H, the wiring used by the iCEstick, iCEBreaker and the
//! Lattice evaluation boards.
//!
//! # Pin assignment
//!
//! | Pin    | Signal  | Direction |
//! |--------|---------|-----------|
//! | ADBUS0 | SCK     | out       |
//! | ADBUS1 | MOSI    | out       |
//! | ADBUS2 | MISO    | in        |
//! | ADBUS4 | CS      | out       |
//! | ADBUS6 | CDONE   | in        |
//! | ADBUS7 | CRESET  | out       |
//!
//! # Example
//!
//! ```no_run
//! use iceprog_ftdi::{Ftdi, FtdiConfig};
//! use iceprog_core::protocol;
//!
//! let mut ftdi = Ftdi::open(&FtdiConfig::default())?;
//! protocol::chip_select(&mut ftdi)?;
//! let id = protocol::read_id(&mut ftdi)?;
//! println!("flash ID: {}", id);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Programmer Options
//!
//! When using the CLI, the following options are available:
//!
//! - `dev=i:<vid>:<pid>` - Open this USB device instead of probing
//!   0403:6010 and 0403:6014
//! - `port=<A|B|C|D>` - Channel to use (default: A)

mod device;
mod error;
pub mod protocol;

pub use device::{parse_options, DeviceString, Ftdi, FtdiConfig};
pub use error::{FtdiError, Result};
pub use protocol::FtdiInterface;
