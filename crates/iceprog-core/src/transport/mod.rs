//! Transport traits and abstractions
//!
//! This module defines the trait every programmer backend implements. The
//! flash protocol and the workflow are written against it and never see a
//! concrete backend.

mod traits;

pub use traits::*;
