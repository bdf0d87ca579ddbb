//! SPI25 protocol implementation
//!
//! Every command brackets itself with chip-select: the flash is selected
//! (with the FPGA held in reset so it keeps off the bus), the command and
//! its payload are clocked in one window and the flash is deselected again.
//!
//! Mutating commands are only reachable through the [`WriteEnabled`] token
//! returned by [`write_enable`]. The token is consumed by the command it
//! enables, so every erase, program or status write is immediately preceded
//! by a Write Enable on the wire.

use crate::error::{Error, Result};
use crate::plan::{fits_in_page, FlashAddress};
use crate::protocol::{Advisory, JedecId};
use crate::spi::opcodes::{self, SECTOR_SIZE};
use crate::spi::StatusRegister;
use crate::transport::Transport;
use std::time::Duration;

// ============================================================================
// Control lines
// ============================================================================

/// Select the flash while holding the FPGA in reset
pub fn chip_select<T: Transport + ?Sized>(t: &mut T) -> Result<()> {
    t.set_control_lines(true, true)
}

/// Deselect the flash, FPGA still held in reset
pub fn chip_deselect<T: Transport + ?Sized>(t: &mut T) -> Result<()> {
    t.set_control_lines(false, true)
}

/// Release both lines and let the FPGA boot
pub fn release_reset<T: Transport + ?Sized>(t: &mut T) -> Result<()> {
    t.set_control_lines(false, false)
}

/// Assert reset and select together, entering SPI slave configuration
pub fn sram_reset<T: Transport + ?Sized>(t: &mut T) -> Result<()> {
    t.set_control_lines(true, true)
}

/// Keep select asserted and release reset so the FPGA accepts a bitstream
pub fn sram_select<T: Transport + ?Sized>(t: &mut T) -> Result<()> {
    t.set_control_lines(true, false)
}

/// Send a response-less command in its own chip-select window
fn command<T: Transport + ?Sized>(t: &mut T, bytes: &[u8]) -> Result<()> {
    chip_select(t)?;
    t.write_only(bytes)?;
    chip_deselect(t)
}

fn address_command(opcode: u8, addr: FlashAddress) -> [u8; 4] {
    let [a2, a1, a0] = addr.to_bytes();
    [opcode, a2, a1, a0]
}

// ============================================================================
// Identification and power
// ============================================================================

/// Bring the flash out of continuous-read or QPI states
///
/// Clocks 8 bits of 0xFF, then 2 more, each in its own chip-select window.
pub fn reset<T: Transport + ?Sized>(t: &mut T) -> Result<()> {
    chip_select(t)?;
    t.transfer_bits(0xFF, 8)?;
    chip_deselect(t)?;

    chip_select(t)?;
    t.transfer_bits(0xFF, 2)?;
    chip_deselect(t)
}

/// Release from deep power-down
pub fn power_up<T: Transport + ?Sized>(t: &mut T) -> Result<()> {
    command(t, &[opcodes::RES])
}

/// Enter deep power-down
pub fn power_down<T: Transport + ?Sized>(t: &mut T) -> Result<()> {
    command(t, &[opcodes::DP])
}

/// Read the JEDEC ID
///
/// Reads manufacturer, the two device bytes and the extended-length byte,
/// then the advertised number of extended bytes in the same window. An
/// extended length of 0xFF is treated as a failed read: the extended bytes
/// are skipped and an advisory is logged.
pub fn read_id<T: Transport + ?Sized>(t: &mut T) -> Result<JedecId> {
    log::debug!("read flash ID..");

    chip_select(t)?;
    let mut header = [0u8; 4];
    t.write_then_read(&[opcodes::RDID], &mut header)?;
    let mut id = JedecId::from_header(header);

    if let Some(advisory) = id.advisory() {
        advisory.log();
    } else if id.extended_len != 0 {
        let mut extended = vec![0u8; id.extended_len as usize];
        t.transfer(&mut extended)?;
        id.extended = extended;
    }
    chip_deselect(t)?;

    log::info!("flash ID: {}", id);
    Ok(id)
}

// ============================================================================
// Status
// ============================================================================

fn fetch_status<T: Transport + ?Sized>(t: &mut T) -> Result<StatusRegister> {
    chip_select(t)?;
    let mut buf = [0u8; 1];
    t.write_then_read(&[opcodes::RDSR], &mut buf)?;
    chip_deselect(t)?;
    Ok(StatusRegister::from(buf[0]))
}

/// Read status register 1 and log its decoded fields at debug level
pub fn read_status<T: Transport + ?Sized>(t: &mut T) -> Result<StatusRegister> {
    let status = fetch_status(t)?;
    status.log_decoded();
    Ok(status)
}

/// How [`wait_ready`] polls the busy bit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Delay between status reads in microseconds
    pub poll_interval_us: u32,
    /// Consecutive non-busy reads required before returning
    pub ready_polls: u32,
    /// Give up after this long; `None` waits forever
    pub timeout: Option<Duration>,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        WaitPolicy {
            poll_interval_us: 1000,
            ready_polls: 2,
            timeout: None,
        }
    }
}

impl WaitPolicy {
    /// Default policy bounded by `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        WaitPolicy {
            timeout: Some(timeout),
            ..Default::default()
        }
    }

    /// Number of status reads allowed by the timeout, if any
    pub fn max_polls(&self) -> Option<u64> {
        self.timeout.map(|timeout| {
            let us = u64::try_from(timeout.as_micros()).unwrap_or(u64::MAX);
            if self.poll_interval_us > 0 {
                (us / self.poll_interval_us as u64).max(1)
            } else {
                us.max(1)
            }
        })
    }
}

/// Poll the status register until the flash reports ready
///
/// Status is read every `poll_interval_us`. The flash is considered ready
/// after `ready_polls` consecutive reads with BUSY clear; any busy read
/// starts the count again. Returns the last status read.
pub fn wait_ready<T: Transport + ?Sized>(t: &mut T, policy: &WaitPolicy) -> Result<StatusRegister> {
    log::trace!("waiting..");

    let max_polls = policy.max_polls();
    let mut polls: u64 = 0;
    let mut ready: u32 = 0;

    loop {
        let status = fetch_status(t)?;
        polls += 1;

        if status.is_busy() {
            ready = 0;
        } else {
            ready += 1;
            if ready >= policy.ready_polls {
                log::trace!("ready after {} polls", polls);
                return Ok(status);
            }
        }

        if max_polls.is_some_and(|max| polls >= max) {
            return Err(Error::Timeout);
        }
        t.delay_us(policy.poll_interval_us);
    }
}

// ============================================================================
// Write enable and mutating commands
// ============================================================================

/// Send Write Enable
///
/// The returned token is the only way to issue a mutating command, and it
/// is consumed by that command.
pub fn write_enable<T: Transport + ?Sized>(t: &mut T) -> Result<WriteEnabled<'_, T>> {
    log::trace!("write enable..");
    command(t, &[opcodes::WREN])?;
    Ok(WriteEnabled { transport: t })
}

/// Proof that Write Enable was the last command sent
#[must_use = "a write enable is wasted unless a mutating command follows"]
pub struct WriteEnabled<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
}

impl<T: Transport + ?Sized> WriteEnabled<'_, T> {
    /// Erase the whole chip
    ///
    /// Completion must be detected with [`wait_ready`].
    pub fn bulk_erase(self) -> Result<()> {
        log::debug!("bulk erase..");
        command(self.transport, &[opcodes::CE_C7])
    }

    /// Erase the 64 KiB sector starting at `addr`
    pub fn sector_erase(self, addr: u32) -> Result<()> {
        let addr = FlashAddress::new(addr)?;
        if addr.get() % SECTOR_SIZE != 0 {
            return Err(Error::InvalidAlignment(addr.get()));
        }
        log::debug!("erase 64kB sector at {}..", addr);
        command(self.transport, &address_command(opcodes::BE_64K, addr))
    }

    /// Program up to one page
    ///
    /// `data` must be 1 to 256 bytes and must not cross the 256-byte page
    /// boundary after `addr`.
    pub fn page_program(self, addr: u32, data: &[u8]) -> Result<()> {
        let addr = FlashAddress::new(addr)?;
        if !fits_in_page(addr.get(), data.len()) {
            return Err(Error::PageOverflow {
                addr: addr.get(),
                len: data.len(),
            });
        }
        log::trace!("prog {} +0x{:03X}..", addr, data.len());

        let t = self.transport;
        chip_select(t)?;
        t.write_only(&address_command(opcodes::PP, addr))?;
        t.write_only(data)?;
        chip_deselect(t)
    }

    /// Write status register 1
    pub fn write_status(self, value: u8) -> Result<()> {
        log::debug!("write status 0x{:02X}..", value);
        command(self.transport, &[opcodes::WRSR, value])
    }

    /// Clear all protection bits
    ///
    /// Writes zero to the status register, waits for the write to finish and
    /// reads it back. A non-zero read-back is returned as an advisory.
    pub fn disable_protection(self, policy: &WaitPolicy) -> Result<Option<Advisory>> {
        log::info!("disable flash protection...");

        let t = self.transport;
        WriteEnabled { transport: &mut *t }.write_status(0x00)?;
        wait_ready(t, policy)?;

        let status = fetch_status(t)?;
        if status.bits() != 0 {
            let advisory = Advisory::ProtectionNotCleared { status };
            advisory.log();
            return Ok(Some(advisory));
        }
        Ok(None)
    }
}

// ============================================================================
// Read
// ============================================================================

/// Read `buf.len()` bytes starting at `addr`
pub fn read<T: Transport + ?Sized>(t: &mut T, addr: u32, buf: &mut [u8]) -> Result<()> {
    let addr = FlashAddress::new(addr)?;
    if buf.is_empty() {
        return Ok(());
    }
    log::trace!("read {} +0x{:03X}..", addr, buf.len());

    chip_select(t)?;
    t.write_then_read(&address_command(opcodes::READ, addr), buf)?;
    chip_deselect(t)
}
