//! SPI25 flash opcodes used when programming iCE40 boards

// ============================================================================
// Write control
// ============================================================================

/// Write Enable - required before any write/erase operation
pub const WREN: u8 = 0x06;

// ============================================================================
// Status register operations
// ============================================================================

/// Read Status Register 1
pub const RDSR: u8 = 0x05;
/// Write Status Register 1
pub const WRSR: u8 = 0x01;

// ============================================================================
// Identification and power
// ============================================================================

/// Read JEDEC ID (manufacturer, device, extended length, extended bytes)
pub const RDID: u8 = 0x9F;
/// Release from Deep Power-Down
pub const RES: u8 = 0xAB;
/// Deep Power-Down
pub const DP: u8 = 0xB9;

// ============================================================================
// Read / program / erase
// ============================================================================

/// Read Data (3-byte address)
pub const READ: u8 = 0x03;
/// Page Program (3-byte address)
pub const PP: u8 = 0x02;
/// 64 KiB Block Erase (3-byte address)
pub const BE_64K: u8 = 0xD8;
/// Chip Erase
pub const CE_C7: u8 = 0xC7;

// ============================================================================
// Geometry
// ============================================================================

/// Page size for programming
pub const PAGE_SIZE: u32 = 256;
/// Erase sector size
pub const SECTOR_SIZE: u32 = 0x10000;
/// Number of bytes addressable with a 3-byte address
pub const ADDRESS_SPACE: u32 = 1 << 24;
