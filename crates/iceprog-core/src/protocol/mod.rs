//! Protocol implementations
//!
//! This module contains the SPI25 command sequences used to identify,
//! erase, program and read the configuration flash of an iCE40 board.

mod advisory;
mod jedec;
mod spi25;

pub use advisory::Advisory;
pub use jedec::JedecId;
pub use spi25::*;
