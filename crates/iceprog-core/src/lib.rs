//! iceprog-core - Core library for iCE40 board flash programming
//!
//! This crate contains everything above the wire: the [`Transport`] trait
//! that every programmer backend implements, the SPI25 flash command set
//! built on top of it, the erase/program planning arithmetic and the
//! programming workflow that sequences a complete run.
//!
//! Backends live in their own crates (`iceprog-ftdi`, `iceprog-linux-spi`,
//! `iceprog-dummy`) and only depend on the [`Transport`] trait.
//!
//! # Example
//!
//! ```ignore
//! use iceprog_core::protocol;
//! use iceprog_core::transport::Transport;
//!
//! fn identify<T: Transport + ?Sized>(t: &mut T) -> iceprog_core::Result<()> {
//!     protocol::chip_select(t)?;
//!     let id = protocol::read_id(t)?;
//!     println!("flash ID: {}", id);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod plan;
pub mod protocol;
pub mod spi;
pub mod transport;
pub mod workflow;

pub use error::{Error, ExitClass, Result};
pub use transport::Transport;
