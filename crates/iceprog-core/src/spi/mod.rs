//! SPI flash primitives
//!
//! Opcodes and the status register layout shared by the protocol layer and
//! the board emulator.

pub mod opcodes;
mod status;

pub use status::StatusRegister;
