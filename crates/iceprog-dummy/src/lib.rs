//! iceprog-dummy - In-memory iCE40 board emulator
//!
//! This crate provides a [`Transport`] that emulates an iCE40 board: a SPI
//! NOR flash behind the chip-select line and an FPGA whose configuration
//! memory can be loaded over the same bus. It's useful for testing and
//! development without real hardware.
//!
//! The flash model decodes each chip-select window byte by byte. Erase sets
//! bytes to 0xFF, page program ANDs data into a page (wrapping within it),
//! and every mutating command requires the write enable latch. After each
//! mutating command the status register reports BUSY for a configurable
//! number of reads.

use std::collections::VecDeque;

use iceprog_core::error::{Error, Result};
use iceprog_core::plan;
use iceprog_core::spi::opcodes::{self, PAGE_SIZE, SECTOR_SIZE};
use iceprog_core::spi::StatusRegister;
use iceprog_core::transport::{bit_mask, check_bit_count, Transport, CONFIG_TRAILER_BITS};

/// Configuration for the emulated board
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Bytes returned after the JEDEC ID opcode (header and extended bytes)
    pub jedec_id: Vec<u8>,
    /// Flash size in bytes
    pub size: usize,
    /// Status reads reporting BUSY after each erase, program or status write
    pub busy_polls: u32,
    /// Status register value that writes cannot change
    pub locked_status: Option<u8>,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            jedec_id: vec![0xEF, 0x40, 0x18, 0x00], // Winbond W25Q128
            size: 16 * 1024 * 1024,
            busy_polls: 2,
            locked_status: None,
        }
    }
}

/// One completed chip-select window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Bytes clocked in, opcode first
    pub bytes: Vec<u8>,
    /// Sub-byte transfers as `(value, nbits)`
    pub bits: Vec<(u8, u8)>,
}

impl Frame {
    /// The command byte, if any whole byte was sent
    pub fn opcode(&self) -> Option<u8> {
        self.bytes.first().copied()
    }

    /// Whether this command changes flash contents or status
    pub fn is_mutating(&self) -> bool {
        matches!(
            self.opcode(),
            Some(opcodes::BE_64K | opcodes::CE_C7 | opcodes::PP | opcodes::WRSR)
        )
    }
}

/// Emulated iCE40 board
pub struct DummyTransport {
    config: DummyConfig,
    flash: Vec<u8>,
    status: u8,
    write_enabled: bool,
    busy: u32,
    powered_down: bool,
    status_script: VecDeque<u8>,

    select: bool,
    reset: bool,
    slow_clock: bool,
    frame: Vec<u8>,
    frame_bits: Vec<(u8, u8)>,
    frames: Vec<Frame>,
    lines: Vec<(bool, bool)>,
    rejected: usize,

    sram: Vec<u8>,
    trailer_bits: u32,
    done: bool,

    elapsed_us: u64,
    closed: bool,
}

impl DummyTransport {
    /// Create a new emulated board with the given configuration
    pub fn new(config: DummyConfig) -> Self {
        let flash = vec![0xFF; config.size];
        Self {
            config,
            flash,
            status: 0,
            write_enabled: false,
            busy: 0,
            powered_down: false,
            status_script: VecDeque::new(),
            select: false,
            reset: false,
            slow_clock: false,
            frame: Vec::new(),
            frame_bits: Vec::new(),
            frames: Vec::new(),
            lines: Vec::new(),
            rejected: 0,
            sram: Vec::new(),
            trailer_bits: 0,
            done: false,
            elapsed_us: 0,
            closed: false,
        }
    }

    /// Create a new board with default configuration (W25Q128, 16 MiB)
    pub fn new_default() -> Self {
        Self::new(DummyConfig::default())
    }

    /// Create a board whose flash starts with `initial_data`
    pub fn with_data(config: DummyConfig, initial_data: &[u8]) -> Self {
        let mut board = Self::new(config);
        let len = initial_data.len().min(board.flash.len());
        board.flash[..len].copy_from_slice(&initial_data[..len]);
        board
    }

    /// Flash contents
    pub fn data(&self) -> &[u8] {
        &self.flash
    }

    /// Mutable flash contents
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.flash
    }

    /// Bytes loaded into configuration memory since the last FPGA reset
    pub fn sram(&self) -> &[u8] {
        &self.sram
    }

    /// Trailer clocks sent since the last FPGA reset
    pub fn trailer_bits(&self) -> u32 {
        self.trailer_bits
    }

    /// Completed chip-select windows in the flash, oldest first
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Every `(select, reset)` pair driven so far
    pub fn line_history(&self) -> &[(bool, bool)] {
        &self.lines
    }

    /// Mutating commands the flash ignored for lack of write enable
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// Current status register value
    pub fn status(&self) -> StatusRegister {
        StatusRegister::from(self.status)
    }

    /// Whether the slow clock is selected
    pub fn slow_clock(&self) -> bool {
        self.slow_clock
    }

    /// Whether the flash is in deep power-down
    pub fn powered_down(&self) -> bool {
        self.powered_down
    }

    /// Total time spent in [`Transport::delay_us`]
    pub fn elapsed_us(&self) -> u64 {
        self.elapsed_us
    }

    /// Whether [`Transport::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Queue raw values for the next status register reads
    ///
    /// Queued values take precedence over the emulated status.
    pub fn push_status(&mut self, values: &[u8]) {
        self.status_script.extend(values.iter().copied());
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::TransportIo("dummy transport is closed".into()))
        } else {
            Ok(())
        }
    }

    /// Flash is selected while the FPGA is held off the bus
    fn flash_selected(&self) -> bool {
        self.select && self.reset
    }

    /// FPGA is out of reset with its SPI slave port selected
    fn sram_selected(&self) -> bool {
        self.select && !self.reset
    }

    fn flash_addr(&self, bytes: &[u8]) -> usize {
        let addr = (bytes[1] as usize) << 16 | (bytes[2] as usize) << 8 | bytes[3] as usize;
        addr % self.flash.len()
    }

    fn read_status_value(&mut self) -> u8 {
        if let Some(value) = self.status_script.pop_front() {
            return value;
        }
        let mut value = self.status & !(StatusRegister::BUSY | StatusRegister::WEL).bits();
        if self.write_enabled {
            value |= StatusRegister::WEL.bits();
        }
        if self.busy > 0 {
            self.busy -= 1;
            value |= StatusRegister::BUSY.bits();
        }
        value
    }

    /// Clock one byte through the flash while its window is open
    fn exchange(&mut self, out: u8) -> u8 {
        let pos = self.frame.len();
        self.frame.push(out);
        let opcode = self.frame[0];

        if self.powered_down || pos == 0 {
            return 0xFF;
        }
        match opcode {
            opcodes::RDID => self.config.jedec_id.get(pos - 1).copied().unwrap_or(0xFF),
            opcodes::RDSR => self.read_status_value(),
            opcodes::READ if pos >= 4 => {
                let addr = self.flash_addr(&self.frame) + (pos - 4);
                self.flash[addr % self.flash.len()]
            }
            _ => 0xFF,
        }
    }

    fn end_frame(&mut self) {
        if self.frame.is_empty() && self.frame_bits.is_empty() {
            return;
        }
        let frame = Frame {
            bytes: std::mem::take(&mut self.frame),
            bits: std::mem::take(&mut self.frame_bits),
        };
        if !frame.bytes.is_empty() {
            self.execute(&frame.bytes);
        }
        self.frames.push(frame);
    }

    fn execute(&mut self, bytes: &[u8]) {
        let opcode = bytes[0];

        if self.powered_down {
            if opcode == opcodes::RES {
                self.powered_down = false;
            }
            return;
        }

        match opcode {
            opcodes::WREN => self.write_enabled = true,
            opcodes::RES => {}
            opcodes::DP => self.powered_down = true,
            opcodes::RDID | opcodes::RDSR | opcodes::READ => {}
            opcodes::BE_64K | opcodes::CE_C7 | opcodes::PP | opcodes::WRSR => {
                if !self.write_enabled {
                    log::warn!("dummy: opcode 0x{:02X} without write enable ignored", opcode);
                    self.rejected += 1;
                    return;
                }
                self.write_enabled = false;
                self.mutate(bytes);
                self.busy = self.config.busy_polls;
            }
            _ => log::debug!("dummy: unknown opcode 0x{:02X}", opcode),
        }
    }

    fn mutate(&mut self, bytes: &[u8]) {
        match (bytes[0], bytes.len()) {
            (opcodes::BE_64K, 4) => {
                let start = self.flash_addr(bytes) & !(SECTOR_SIZE as usize - 1);
                let end = (start + SECTOR_SIZE as usize).min(self.flash.len());
                log::debug!("dummy: erase 0x{:06X}..0x{:06X}", start, end);
                self.flash[start..end].fill(0xFF);
            }
            (opcodes::CE_C7, 1) => {
                log::debug!("dummy: chip erase");
                self.flash.fill(0xFF);
            }
            (opcodes::PP, n) if n > 4 => {
                let addr = self.flash_addr(bytes);
                let page = addr & !(PAGE_SIZE as usize - 1);
                for (i, &b) in bytes[4..].iter().enumerate() {
                    let at = page | ((addr + i) & (PAGE_SIZE as usize - 1));
                    self.flash[at] &= b;
                }
            }
            (opcodes::WRSR, n) if n >= 2 => {
                self.status = self.config.locked_status.unwrap_or(bytes[1] & 0xFC);
            }
            (opcode, n) => {
                log::warn!("dummy: malformed command 0x{:02X} ({} bytes)", opcode, n);
                self.rejected += 1;
            }
        }
    }
}

impl Transport for DummyTransport {
    fn set_control_lines(&mut self, select: bool, reset: bool) -> Result<()> {
        self.check_open()?;
        self.lines.push((select, reset));

        if self.flash_selected() && !(select && reset) {
            self.end_frame();
        }
        if reset && !self.reset {
            // Reset clears configuration memory
            self.done = false;
            self.sram.clear();
            self.trailer_bits = 0;
        }
        if !reset && self.reset && !select {
            // FPGA boots from flash
            let first_page = &self.flash[..self.flash.len().min(PAGE_SIZE as usize)];
            self.done = first_page.iter().any(|&b| b != 0xFF);
        }

        self.select = select;
        self.reset = reset;
        Ok(())
    }

    fn read_ready_line(&mut self) -> Result<bool> {
        self.check_open()?;
        Ok(self.done)
    }

    fn write_only(&mut self, data: &[u8]) -> Result<()> {
        self.check_open()?;
        if self.flash_selected() {
            for &b in data {
                self.exchange(b);
            }
        } else if self.sram_selected() {
            self.sram.extend_from_slice(data);
        } else {
            log::warn!("dummy: {} bytes sent with nothing selected", data.len());
        }
        Ok(())
    }

    fn transfer(&mut self, data: &mut [u8]) -> Result<()> {
        self.check_open()?;
        if self.flash_selected() {
            for b in data.iter_mut() {
                *b = self.exchange(*b);
            }
        } else {
            self.write_only(data)?;
            data.fill(0xFF);
        }
        Ok(())
    }

    fn transfer_bits(&mut self, value: u8, nbits: u8) -> Result<u8> {
        self.check_open()?;
        check_bit_count(nbits)?;
        let mask = bit_mask(nbits);
        if self.flash_selected() {
            self.frame_bits.push((value & mask, nbits));
        }
        // MISO idles high
        Ok(mask)
    }

    fn set_clock_rate(&mut self, slow: bool) -> Result<()> {
        self.check_open()?;
        self.slow_clock = slow;
        Ok(())
    }

    fn send_trailer_bits(&mut self, nbits: u32) -> Result<()> {
        self.check_open()?;
        self.trailer_bits += nbits;
        if self.sram_selected() && !self.sram.is_empty() && self.trailer_bits >= CONFIG_TRAILER_BITS
        {
            self.done = true;
        }
        Ok(())
    }

    fn delay_us(&mut self, us: u32) {
        self.elapsed_us += us as u64;
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.end_frame();
            self.closed = true;
            log::debug!("dummy: closed");
        }
        Ok(())
    }
}

impl Drop for DummyTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Parse programmer options from a list of key-value pairs
///
/// Supported keys: `size=<bytes>` (decimal, `0x` hex, or with a `k`/`M`
/// suffix) and `busy=<polls>`.
pub fn parse_options(options: &[(&str, &str)]) -> std::result::Result<DummyConfig, String> {
    let mut config = DummyConfig::default();

    for (key, value) in options {
        match *key {
            "size" => {
                config.size = plan::parse_size(value)
                    .ok_or_else(|| format!("Invalid size: {}", value))?
                    as usize;
                if config.size == 0 || config.size > opcodes::ADDRESS_SPACE as usize {
                    return Err(format!("Flash size out of range: {}", value));
                }
            }
            "busy" => {
                config.busy_polls = value
                    .parse()
                    .map_err(|_| format!("Invalid busy value: {}", value))?;
            }
            _ => {
                log::warn!("dummy: Unknown option: {}={}", key, value);
            }
        }
    }

    Ok(config)
}
