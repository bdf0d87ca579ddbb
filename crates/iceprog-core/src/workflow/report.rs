//! Run reports
//!
//! A [`Report`] records the stages a run entered and what each did.

use crate::plan::SectorExtent;
use crate::protocol::{Advisory, JedecId};
use std::fmt;

/// Workflow states, in the order a full flash run visits them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Deselect, wake the flash and leave any continuous-read mode
    Reset,
    /// Read the JEDEC ID
    IdRead,
    /// Clear the status register protection bits
    ProtectionClear,
    /// Sector or bulk erase
    Erase,
    /// Page-wise programming
    Program,
    /// Compare against the input, or copy flash to the output
    Verify,
    /// Power the flash down and let the FPGA boot
    PowerDownReset,
    /// Put the FPGA into SPI slave configuration mode
    SramReset,
    /// Stream the bitstream into configuration memory
    SramProgram,
    /// Run finished
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Reset => "reset",
            Stage::IdRead => "id-read",
            Stage::ProtectionClear => "protection-clear",
            Stage::Erase => "erase",
            Stage::Program => "program",
            Stage::Verify => "verify",
            Stage::PowerDownReset => "power-down-reset",
            Stage::SramReset => "sram-reset",
            Stage::SramProgram => "sram-program",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// What a workflow run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    /// Stages in the order they were entered
    pub stages: Vec<Stage>,
    /// ID read from the flash
    pub jedec_id: Option<JedecId>,
    /// Non-fatal conditions encountered on the way
    pub advisories: Vec<Advisory>,
    /// Sectors erased, in order
    pub erased: Vec<SectorExtent>,
    /// Whether the whole chip was erased
    pub bulk_erased: bool,
    /// Page program commands issued
    pub pages_programmed: usize,
    /// Bytes programmed
    pub bytes_programmed: usize,
    /// Bytes compared against the input
    pub bytes_verified: usize,
    /// Bytes copied to the output
    pub bytes_read: usize,
    /// Bytes streamed into configuration memory
    pub bytes_streamed: usize,
    /// Last sampled level of the ready line
    pub ready: Option<bool>,
}
