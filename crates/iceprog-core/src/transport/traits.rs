//! Transport trait definition

use crate::error::Result;
use std::time::Duration;

/// Number of don't-care clocks an iCE40 needs after its bitstream
pub const CONFIG_TRAILER_BITS: u32 = 49;

/// Nominal serial clock in Hz
pub const FAST_CLOCK_HZ: u32 = 6_000_000;

/// Slow serial clock in Hz
pub const SLOW_CLOCK_HZ: u32 = 50_000;

/// A physical link to an iCE40 board
///
/// A transport drives two active-low output lines (flash chip-select and
/// FPGA reset), samples the FPGA's configuration-done line and clocks bytes
/// or sub-byte bit groups over SPI. Every call blocks until the exchange has
/// completed on the wire.
///
/// Both control lines are given as *logical* states: `true` means asserted,
/// which is a low level on the wire.
///
/// Exactly one transport is open per process. `close` releases it and must
/// be safe to call more than once; implementations also call it from `Drop`.
pub trait Transport {
    /// Drive the chip-select and reset lines
    fn set_control_lines(&mut self, select: bool, reset: bool) -> Result<()>;

    /// Sample the configuration-done / ready input
    fn read_ready_line(&mut self) -> Result<bool>;

    /// Clock out `data`, discarding whatever is shifted in
    fn write_only(&mut self, data: &[u8]) -> Result<()>;

    /// Full-duplex exchange
    ///
    /// Every byte of `data` is sent and replaced by the byte captured while
    /// it was being clocked out.
    fn transfer(&mut self, data: &mut [u8]) -> Result<()>;

    /// Clock out `tx`, then clock in `rx.len()` bytes
    ///
    /// The default implementation runs a single full-duplex exchange of `tx`
    /// followed by zero bytes and keeps the tail.
    fn write_then_read(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        let mut buf = Vec::with_capacity(tx.len() + rx.len());
        buf.extend_from_slice(tx);
        buf.resize(tx.len() + rx.len(), 0);
        self.transfer(&mut buf)?;
        rx.copy_from_slice(&buf[tx.len()..]);
        Ok(())
    }

    /// Exchange `nbits` bits (1 to 8)
    ///
    /// Only the low `nbits` bits of `value` are sent, most significant first.
    /// The captured bits are returned in the low `nbits` bits of the result.
    fn transfer_bits(&mut self, value: u8, nbits: u8) -> Result<u8>;

    /// Switch between the nominal (6 MHz) and slow (50 kHz) clock
    fn set_clock_rate(&mut self, slow: bool) -> Result<()>;

    /// Clock `nbits` don't-care bits without touching chip-select
    fn send_trailer_bits(&mut self, nbits: u32) -> Result<()>;

    /// Sleep for `us` microseconds
    fn delay_us(&mut self, us: u32) {
        std::thread::sleep(Duration::from_micros(us as u64));
    }

    /// Release the device and restore anything changed at open
    fn close(&mut self) -> Result<()>;

    /// Tear down the transport and terminate the process
    ///
    /// This is the single abort path for unrecoverable errors.
    fn fail(&mut self, code: i32) -> ! {
        if let Err(e) = self.close() {
            log::warn!("Failed to close transport: {}", e);
        }
        log::error!("ABORT.");
        std::process::exit(code)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn set_control_lines(&mut self, select: bool, reset: bool) -> Result<()> {
        (**self).set_control_lines(select, reset)
    }

    fn read_ready_line(&mut self) -> Result<bool> {
        (**self).read_ready_line()
    }

    fn write_only(&mut self, data: &[u8]) -> Result<()> {
        (**self).write_only(data)
    }

    fn transfer(&mut self, data: &mut [u8]) -> Result<()> {
        (**self).transfer(data)
    }

    fn write_then_read(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        (**self).write_then_read(tx, rx)
    }

    fn transfer_bits(&mut self, value: u8, nbits: u8) -> Result<u8> {
        (**self).transfer_bits(value, nbits)
    }

    fn set_clock_rate(&mut self, slow: bool) -> Result<()> {
        (**self).set_clock_rate(slow)
    }

    fn send_trailer_bits(&mut self, nbits: u32) -> Result<()> {
        (**self).send_trailer_bits(nbits)
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn fail(&mut self, code: i32) -> ! {
        (**self).fail(code)
    }
}

/// Mask selecting the low `nbits` bits of a byte
pub fn bit_mask(nbits: u8) -> u8 {
    if nbits >= 8 {
        0xFF
    } else {
        (1u8 << nbits) - 1
    }
}

/// Check that a sub-byte transfer width is between 1 and 8 bits
pub fn check_bit_count(nbits: u8) -> Result<()> {
    if (1..=8).contains(&nbits) {
        Ok(())
    } else {
        Err(crate::Error::Unsupported("bit transfer width outside 1..=8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_mask() {
        assert_eq!(bit_mask(1), 0x01);
        assert_eq!(bit_mask(2), 0x03);
        assert_eq!(bit_mask(4), 0x0F);
        assert_eq!(bit_mask(7), 0x7F);
        assert_eq!(bit_mask(8), 0xFF);
    }

    #[test]
    fn test_check_bit_count() {
        assert!(check_bit_count(0).is_err());
        assert!(check_bit_count(1).is_ok());
        assert!(check_bit_count(8).is_ok());
        assert!(check_bit_count(9).is_err());
    }
}
