//! Programming workflow
//!
//! A run starts with a common preparation (clock rate, reset released,
//! settle), then follows one of two paths:
//!
//! - **flash**: `Reset → IdRead → [ProtectionClear] → [Erase] → [Program] →
//!   [Verify] → PowerDownReset → Done`, with the optional stages chosen by
//!   the [`Operation`];
//! - **SRAM**: the FPGA is put into SPI slave configuration mode and the
//!   bitstream is streamed straight into configuration memory.
//!
//! Non-fatal conditions are collected as [`Advisory`] values in the
//! returned [`Report`]. Any error aborts the run at the point it occurred;
//! the caller is expected to tear the transport down with
//! [`Transport::fail`](crate::Transport::fail).

mod progress;
mod report;
mod source;

pub use progress::{NoProgress, Progress};
pub use report::{Report, Stage};
pub use source::ByteSource;

use crate::error::{Error, Result};
use crate::plan::ProgrammingPlan;
use crate::protocol::{self, Advisory, WaitPolicy};
use crate::spi::opcodes::PAGE_SIZE;
use crate::transport::{Transport, CONFIG_TRAILER_BITS};
use std::io::Write;

/// Settle time after releasing reset at start-up
const INIT_SETTLE_US: u32 = 100_000;
/// Settle time after deselecting the flash and after the final reset release
const RESET_SETTLE_US: u32 = 250_000;
/// Reset pulse width when entering SPI slave configuration
const SRAM_RESET_US: u32 = 100;
/// Time the FPGA needs to clear configuration memory
const SRAM_CLEAR_US: u32 = 2_000;
/// Bitstream bytes sent per write in SRAM mode
const SRAM_CHUNK_SIZE: usize = 4096;
/// Bytes per read when verifying or dumping
const READ_CHUNK_SIZE: usize = PAGE_SIZE as usize;

/// Default number of bytes copied by a read
pub const DEFAULT_READ_SIZE: u32 = 256 * 1024;

/// How the flash is cleared before programming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EraseMode {
    /// Erase the 64 KiB sectors covered by the data
    #[default]
    Sectors,
    /// Erase the entire chip
    Bulk,
    /// Do not erase
    Skip,
}

/// Options shared by the operations that modify flash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteOptions {
    /// Erase strategy
    pub erase: EraseMode,
    /// Clear the status register protection bits first
    pub disable_protection: bool,
}

/// What a run does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Erase, program the input and verify it
    Program(WriteOptions),
    /// Erase as if `size` bytes were about to be written
    EraseOnly {
        /// Number of bytes the erase must cover
        size: u32,
        /// Erase strategy and protection handling
        write: WriteOptions,
    },
    /// Compare flash against the input
    Verify,
    /// Copy `size` bytes of flash to the output
    Read {
        /// Number of bytes to copy
        size: u32,
    },
    /// Only read the flash ID
    Identify,
    /// Load the input into FPGA configuration memory
    Sram,
}

impl Operation {
    /// Whether the operation consumes an input stream
    pub fn needs_input(&self) -> bool {
        matches!(self, Operation::Program(_) | Operation::Verify | Operation::Sram)
    }

    /// Whether the operation produces an output stream
    pub fn needs_output(&self) -> bool {
        matches!(self, Operation::Read { .. })
    }
}

/// Run-wide settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlashOptions {
    /// Flash address the input maps to
    pub offset: u32,
    /// Use the 50 kHz clock instead of 6 MHz
    pub slow_clock: bool,
    /// Busy polling behaviour
    pub wait: WaitPolicy,
}

/// Data attached to a run
pub enum DataStream<'s> {
    /// No data (identify, erase-only)
    None,
    /// Bitstream to program, verify against or load into SRAM
    Input(&'s mut dyn ByteSource),
    /// Destination of a flash read
    Output(&'s mut dyn Write),
}

/// Run `operation` on `transport`
///
/// This is the single entry point used by the CLI. See the module docs for
/// the stage sequence.
pub fn run<T: Transport + ?Sized, P: Progress>(
    transport: &mut T,
    options: &FlashOptions,
    operation: &Operation,
    data: DataStream<'_>,
    progress: P,
) -> Result<Report> {
    let mut workflow = Workflow::new(transport, *options, progress);
    match (operation, data) {
        (Operation::Program(write), DataStream::Input(source)) => {
            workflow.program(source, write)
        }
        (Operation::Verify, DataStream::Input(source)) => workflow.verify(source),
        (Operation::Sram, DataStream::Input(source)) => workflow.sram(source),
        (Operation::Read { size }, DataStream::Output(sink)) => workflow.read(*size, sink),
        (Operation::EraseOnly { size, write }, _) => workflow.erase_only(*size, write),
        (Operation::Identify, _) => workflow.identify(),
        (op, _) if op.needs_input() => Err(Error::Configuration(
            "operation requires an input stream".into(),
        )),
        _ => Err(Error::Configuration(
            "operation requires an output stream".into(),
        )),
    }?;
    Ok(workflow.finish())
}

/// State of one run
pub struct Workflow<'a, T: Transport + ?Sized, P: Progress> {
    transport: &'a mut T,
    options: FlashOptions,
    progress: P,
    report: Report,
}

impl<'a, T: Transport + ?Sized, P: Progress> Workflow<'a, T, P> {
    /// Start a run
    pub fn new(transport: &'a mut T, options: FlashOptions, progress: P) -> Self {
        Workflow {
            transport,
            options,
            progress,
            report: Report::default(),
        }
    }

    /// End the run and hand back what it did
    pub fn finish(mut self) -> Report {
        self.enter(Stage::Done);
        self.report
    }

    /// Erase, program and verify `source` at the configured offset
    pub fn program(&mut self, source: &mut dyn ByteSource, write: &WriteOptions) -> Result<()> {
        let length = source.total_len()?;
        let length = usize::try_from(length)
            .map_err(|_| Error::InvalidAddress(u32::MAX))?;
        let plan = ProgrammingPlan::new(self.options.offset, length)?;

        self.prepare()?;
        self.flash_reset()?;
        self.identify_flash()?;
        self.modify(&plan, write)?;
        self.program_pages(&plan, source)?;
        self.compare(source)?;
        self.power_down_reset()
    }

    /// Erase without programming
    pub fn erase_only(&mut self, size: u32, write: &WriteOptions) -> Result<()> {
        let plan = ProgrammingPlan::new(self.options.offset, size as usize)?;

        self.prepare()?;
        self.flash_reset()?;
        self.identify_flash()?;
        self.modify(&plan, write)?;
        self.power_down_reset()
    }

    /// Compare flash against `source`
    pub fn verify(&mut self, source: &mut dyn ByteSource) -> Result<()> {
        self.prepare()?;
        self.flash_reset()?;
        self.identify_flash()?;
        self.compare(source)?;
        self.power_down_reset()
    }

    /// Copy `size` bytes of flash to `sink`
    pub fn read(&mut self, size: u32, sink: &mut dyn Write) -> Result<()> {
        ProgrammingPlan::new(self.options.offset, size as usize)?;

        self.prepare()?;
        self.flash_reset()?;
        self.identify_flash()?;
        self.dump(size, sink)?;
        self.power_down_reset()
    }

    /// Only read the flash ID
    pub fn identify(&mut self) -> Result<()> {
        self.prepare()?;
        self.flash_reset()?;
        self.identify_flash()?;
        self.power_down_reset()
    }

    /// Load `source` into FPGA configuration memory
    pub fn sram(&mut self, source: &mut dyn ByteSource) -> Result<()> {
        self.prepare()?;

        self.enter(Stage::SramReset);
        log::info!("reset..");
        protocol::sram_reset(self.transport)?;
        self.transport.delay_us(SRAM_RESET_US);
        protocol::sram_select(self.transport)?;
        self.transport.delay_us(SRAM_CLEAR_US);
        self.sample_ready()?;

        self.enter(Stage::SramProgram);
        log::info!("programming..");
        let total = source.total_len()? as usize;
        self.progress.programming(total);
        let mut buf = vec![0u8; SRAM_CHUNK_SIZE];
        loop {
            let n = source.read_chunk(&mut buf)?;
            if n == 0 {
                break;
            }
            log::debug!("sending {} bytes.", n);
            self.transport.write_only(&buf[..n])?;
            self.report.bytes_streamed += n;
            self.progress.program_progress(self.report.bytes_streamed);
        }
        self.transport.send_trailer_bits(CONFIG_TRAILER_BITS)?;
        self.progress.finish();
        self.sample_ready()?;
        Ok(())
    }

    fn enter(&mut self, stage: Stage) {
        log::debug!("entering stage {}", stage);
        self.report.stages.push(stage);
    }

    fn advise(&mut self, advisory: Option<Advisory>) {
        if let Some(advisory) = advisory {
            self.report.advisories.push(advisory);
        }
    }

    fn sample_ready(&mut self) -> Result<bool> {
        let high = self.transport.read_ready_line()?;
        log::info!("cdone: {}", if high { "high" } else { "low" });
        self.report.ready = Some(high);
        Ok(high)
    }

    fn prepare(&mut self) -> Result<()> {
        log::info!("init..");
        self.transport.set_clock_rate(self.options.slow_clock)?;
        self.sample_ready()?;
        protocol::release_reset(self.transport)?;
        self.transport.delay_us(INIT_SETTLE_US);
        Ok(())
    }

    fn flash_reset(&mut self) -> Result<()> {
        self.enter(Stage::Reset);
        log::info!("reset..");
        protocol::chip_deselect(self.transport)?;
        self.transport.delay_us(RESET_SETTLE_US);
        self.sample_ready()?;
        protocol::reset(self.transport)?;
        protocol::power_up(self.transport)
    }

    fn identify_flash(&mut self) -> Result<()> {
        self.enter(Stage::IdRead);
        let id = protocol::read_id(self.transport)?;
        self.advise(id.advisory());
        self.report.jedec_id = Some(id);
        Ok(())
    }

    /// Protection clear and erase
    fn modify(&mut self, plan: &ProgrammingPlan, write: &WriteOptions) -> Result<()> {
        if write.disable_protection {
            self.enter(Stage::ProtectionClear);
            let advisory = protocol::write_enable(self.transport)?
                .disable_protection(&self.options.wait)?;
            self.advise(advisory);
        }

        match write.erase {
            EraseMode::Skip => Ok(()),
            EraseMode::Bulk => self.bulk_erase(),
            EraseMode::Sectors => self.sector_erase(plan),
        }
    }

    fn bulk_erase(&mut self) -> Result<()> {
        self.enter(Stage::Erase);
        self.progress.erasing(1, 0);
        protocol::write_enable(self.transport)?.bulk_erase()?;
        protocol::wait_ready(self.transport, &self.options.wait)?;
        self.report.bulk_erased = true;
        self.progress.erase_progress(1);
        self.progress.finish();
        Ok(())
    }

    fn sector_erase(&mut self, plan: &ProgrammingPlan) -> Result<()> {
        self.enter(Stage::Erase);
        log::info!("file size: {}", plan.length());

        let extent = plan.erase_extent();
        self.progress.erasing(extent.sector_count(), extent.len() as usize);
        for sector in plan.sectors() {
            protocol::write_enable(self.transport)?.sector_erase(sector.begin)?;
            if log::log_enabled!(log::Level::Debug) {
                log::debug!("Status after block erase:");
                protocol::read_status(self.transport)?;
            }
            protocol::wait_ready(self.transport, &self.options.wait)?;
            self.report.erased.push(sector);
            self.progress.erase_progress(self.report.erased.len());
        }
        self.progress.finish();
        Ok(())
    }

    fn program_pages(&mut self, plan: &ProgrammingPlan, source: &mut dyn ByteSource) -> Result<()> {
        self.enter(Stage::Program);
        log::info!("programming..");
        log::debug!("{} bytes at 0x{:06X}", plan.length(), plan.offset());
        self.progress.programming(plan.length() as usize);

        let mut buf = [0u8; PAGE_SIZE as usize];
        for span in plan.pages() {
            let n = source.read_chunk(&mut buf[..span.len])?;
            if n == 0 {
                break;
            }
            protocol::write_enable(self.transport)?.page_program(span.addr, &buf[..n])?;
            protocol::wait_ready(self.transport, &self.options.wait)?;
            self.report.pages_programmed += 1;
            self.report.bytes_programmed += n;
            self.progress.program_progress(self.report.bytes_programmed);
            if n < span.len {
                break;
            }
        }
        self.progress.finish();
        source.rewind()?;
        Ok(())
    }

    fn compare(&mut self, source: &mut dyn ByteSource) -> Result<()> {
        self.enter(Stage::Verify);
        log::info!("reading..");
        source.rewind()?;
        let total = source.total_len()? as usize;
        self.progress.reading(total);

        let offset = self.options.offset;
        let mut expected = [0u8; READ_CHUNK_SIZE];
        let mut found = [0u8; READ_CHUNK_SIZE];
        let mut cursor = 0usize;
        loop {
            let n = source.read_chunk(&mut expected)?;
            if n == 0 {
                break;
            }
            let addr = offset + cursor as u32;
            protocol::read(self.transport, addr, &mut found[..n])?;
            if let Some(i) = (0..n).find(|&i| expected[i] != found[i]) {
                log::error!("Found difference between flash and file!");
                return Err(Error::VerificationMismatch {
                    addr: addr + i as u32,
                    expected: expected[i],
                    found: found[i],
                });
            }
            cursor += n;
            self.report.bytes_verified = cursor;
            self.progress.read_progress(cursor);
        }
        self.progress.finish();
        log::info!("VERIFY OK");
        Ok(())
    }

    fn dump(&mut self, size: u32, sink: &mut dyn Write) -> Result<()> {
        self.enter(Stage::Verify);
        log::info!("reading..");
        self.progress.reading(size as usize);

        let mut buf = [0u8; READ_CHUNK_SIZE];
        let mut addr = 0u32;
        while addr < size {
            let n = (size - addr).min(READ_CHUNK_SIZE as u32) as usize;
            protocol::read(self.transport, self.options.offset + addr, &mut buf[..n])?;
            sink.write_all(&buf[..n])?;
            addr += n as u32;
            self.report.bytes_read = addr as usize;
            self.progress.read_progress(addr as usize);
        }
        sink.flush()?;
        self.progress.finish();
        Ok(())
    }

    fn power_down_reset(&mut self) -> Result<()> {
        self.enter(Stage::PowerDownReset);
        protocol::power_down(self.transport)?;
        protocol::release_reset(self.transport)?;
        self.transport.delay_us(RESET_SETTLE_US);
        self.sample_ready()?;
        Ok(())
    }
}
