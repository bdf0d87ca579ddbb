//! FTDI MPSSE protocol constants and command encoding
//!
//! Every [`Transport`](iceprog_core::Transport) call on an FTDI adapter is
//! a short MPSSE command sequence. The encoders here build those sequences
//! without touching USB so they can be checked byte for byte.

// ============================================================================
// USB VID/PID constants
// ============================================================================

/// FTDI vendor ID
pub const FTDI_VID: u16 = 0x0403;

/// FT2232H product ID (iCEstick, iCEBreaker, HX8K breakout)
pub const FTDI_FT2232H_PID: u16 = 0x6010;

/// FT232H product ID
pub const FTDI_FT232H_PID: u16 = 0x6014;

/// Devices probed, in order, when no device string is given
pub const DEFAULT_DEVICES: &[(u16, u16)] = &[(FTDI_VID, FTDI_FT2232H_PID), (FTDI_VID, FTDI_FT232H_PID)];

// ============================================================================
// MPSSE Commands
// ============================================================================

/// Write bytes on negative clock edge
pub const MPSSE_DO_WRITE: u8 = 0x10;

/// Read bytes
pub const MPSSE_DO_READ: u8 = 0x20;

/// Write on negative clock edge
pub const MPSSE_WRITE_NEG: u8 = 0x01;

/// Bit mode (transfer bits instead of bytes)
pub const MPSSE_BITMODE: u8 = 0x02;

/// Clock bytes out on the falling edge, nothing captured
pub const MPSSE_WRITE_BYTES: u8 = MPSSE_DO_WRITE | MPSSE_WRITE_NEG;

/// Clock bytes out on the falling edge, capture on the rising edge
pub const MPSSE_RW_BYTES: u8 = MPSSE_DO_WRITE | MPSSE_DO_READ | MPSSE_WRITE_NEG;

/// Bit-granular variant of [`MPSSE_RW_BYTES`]
pub const MPSSE_RW_BITS: u8 = MPSSE_RW_BYTES | MPSSE_BITMODE;

/// Set data bits low byte
pub const SET_BITS_LOW: u8 = 0x80;

/// Get data bits low byte
pub const GET_BITS_LOW: u8 = 0x81;

/// Set clock divisor
pub const TCK_DIVISOR: u8 = 0x86;

/// Enable divide-by-5 prescaler (12 MHz clock)
pub const EN_DIV_5: u8 = 0x8B;

/// Clock bits without data transfer
pub const CLK_BITS: u8 = 0x8E;

/// Clock bytes without data transfer
pub const CLK_BYTES: u8 = 0x8F;

// ============================================================================
// Pins and limits
// ============================================================================

/// ADBUS0, serial clock
pub const PIN_SCK: u8 = 0x01;

/// ADBUS1, data to the board
pub const PIN_MOSI: u8 = 0x02;

/// ADBUS2, data from the board
pub const PIN_MISO: u8 = 0x04;

/// ADBUS4, flash chip-select (active low)
pub const PIN_CS: u8 = 0x10;

/// ADBUS6, FPGA configuration done
pub const PIN_CDONE: u8 = 0x40;

/// ADBUS7, FPGA configuration reset (active low)
pub const PIN_CRESET: u8 = 0x80;

/// Output pins
pub const PIN_DIRECTION: u8 = PIN_SCK | PIN_MOSI | PIN_CS | PIN_CRESET;

/// Longest payload a single MPSSE byte command can carry
pub const MAX_CHUNK: usize = 65536;

/// Divisor for 50 kHz from the 12 MHz base clock: 12 MHz / ((1 + 119) * 2)
pub const SLOW_DIVISOR: u16 = 119;

/// Divisor for 6 MHz from the 12 MHz base clock
pub const FAST_DIVISOR: u16 = 0;

/// FTDI interface/channel selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FtdiInterface {
    /// Channel A (default)
    #[default]
    A,
    /// Channel B
    B,
    /// Channel C
    C,
    /// Channel D
    D,
}

impl FtdiInterface {
    /// Parse interface from character
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'A' => Some(FtdiInterface::A),
            'B' => Some(FtdiInterface::B),
            'C' => Some(FtdiInterface::C),
            'D' => Some(FtdiInterface::D),
            _ => None,
        }
    }

    /// Get the channel letter
    pub fn letter(&self) -> char {
        match self {
            FtdiInterface::A => 'A',
            FtdiInterface::B => 'B',
            FtdiInterface::C => 'C',
            FtdiInterface::D => 'D',
        }
    }
}

// ============================================================================
// Encoders
// ============================================================================

fn push_len(buf: &mut Vec<u8>, n: usize) {
    let len = (n - 1) as u16;
    buf.extend_from_slice(&len.to_le_bytes());
}

/// Append write-only commands for `data`, split into 64 KiB pieces
pub fn encode_write(buf: &mut Vec<u8>, data: &[u8]) {
    for chunk in data.chunks(MAX_CHUNK) {
        buf.push(MPSSE_WRITE_BYTES);
        push_len(buf, chunk.len());
        buf.extend_from_slice(chunk);
    }
}

/// Append full-duplex commands for `data`
///
/// The device answers with exactly `data.len()` bytes.
pub fn encode_transfer(buf: &mut Vec<u8>, data: &[u8]) {
    for chunk in data.chunks(MAX_CHUNK) {
        buf.push(MPSSE_RW_BYTES);
        push_len(buf, chunk.len());
        buf.extend_from_slice(chunk);
    }
}

/// Full-duplex exchange of the low `nbits` bits of `value`
///
/// MPSSE shifts bit commands out from the top of the byte, so the value is
/// left-aligned first.
pub fn encode_bits(value: u8, nbits: u8) -> [u8; 3] {
    [MPSSE_RW_BITS, nbits - 1, value << (8 - nbits)]
}

/// Drive CS and CRESET
///
/// Both are active low: a pin is set high when its line is deasserted.
pub fn encode_lines(select: bool, reset: bool) -> [u8; 3] {
    let mut gpio = 0;
    if !select {
        gpio |= PIN_CS;
    }
    if !reset {
        gpio |= PIN_CRESET;
    }
    [SET_BITS_LOW, gpio, PIN_DIRECTION]
}

/// Sample the low pin byte
pub fn encode_read_pins() -> [u8; 1] {
    [GET_BITS_LOW]
}

/// Whether CDONE is high in a sampled pin byte
pub fn cdone_high(pins: u8) -> bool {
    pins & PIN_CDONE != 0
}

/// Select 50 kHz or 6 MHz
pub fn encode_clock(slow: bool) -> [u8; 3] {
    let divisor = if slow { SLOW_DIVISOR } else { FAST_DIVISOR };
    let [lo, hi] = divisor.to_le_bytes();
    [TCK_DIVISOR, lo, hi]
}

/// Append commands clocking `nbits` dummy bits
pub fn encode_trailer(buf: &mut Vec<u8>, nbits: u32) {
    let mut bytes = (nbits / 8) as usize;
    while bytes > 0 {
        let n = bytes.min(MAX_CHUNK);
        buf.push(CLK_BYTES);
        push_len(buf, n);
        bytes -= n;
    }
    let bits = (nbits % 8) as u8;
    if bits > 0 {
        buf.extend_from_slice(&[CLK_BITS, bits - 1]);
    }
}
