//! Erase and program planning
//!
//! A [`ProgrammingPlan`] is derived from the byte offset and length of a
//! write. It yields the 64 KiB sectors that must be erased and the
//! page-bounded spans the data is programmed in. Plans are cheap and are
//! rebuilt for every run.

use crate::error::{Error, Result};
use crate::spi::opcodes::{ADDRESS_SPACE, PAGE_SIZE, SECTOR_SIZE};
use std::fmt;

/// A 24-bit flash byte address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FlashAddress(u32);

impl FlashAddress {
    /// Validate that `addr` fits in three address bytes
    pub fn new(addr: u32) -> Result<Self> {
        if addr < ADDRESS_SPACE {
            Ok(FlashAddress(addr))
        } else {
            Err(Error::InvalidAddress(addr))
        }
    }

    /// The raw address
    pub fn get(self) -> u32 {
        self.0
    }

    /// Big-endian address bytes as sent after an opcode
    pub fn to_bytes(self) -> [u8; 3] {
        let b = self.0.to_be_bytes();
        [b[1], b[2], b[3]]
    }
}

impl TryFrom<u32> for FlashAddress {
    type Error = Error;

    fn try_from(addr: u32) -> Result<Self> {
        FlashAddress::new(addr)
    }
}

impl fmt::Display for FlashAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:06X}", self.0)
    }
}

/// A 64 KiB aligned erase range `[begin, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorExtent {
    /// First byte, a multiple of 64 KiB
    pub begin: u32,
    /// One past the last byte, a multiple of 64 KiB
    pub end: u32,
}

impl SectorExtent {
    /// Size of the extent in bytes
    pub fn len(&self) -> u32 {
        self.end - self.begin
    }

    /// Whether the extent covers no bytes
    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    /// Number of 64 KiB sectors in the extent
    pub fn sector_count(&self) -> usize {
        (self.len() / SECTOR_SIZE) as usize
    }

    /// Iterate over the individual sectors in ascending order
    pub fn sectors(&self) -> impl Iterator<Item = SectorExtent> {
        (self.begin..self.end)
            .step_by(SECTOR_SIZE as usize)
            .map(|begin| SectorExtent {
                begin,
                end: begin + SECTOR_SIZE,
            })
    }
}

impl fmt::Display for SectorExtent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:06X}..0x{:06X}", self.begin, self.end)
    }
}

/// A span written by a single page program command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSpan {
    /// Flash address of the first byte
    pub addr: u32,
    /// Number of bytes, 1 to 256
    pub len: usize,
}

/// Bytes left in the 256-byte page that contains `addr`
pub fn page_remaining(addr: u32) -> usize {
    (PAGE_SIZE - addr % PAGE_SIZE) as usize
}

/// Whether `len` bytes starting at `addr` stay inside a single page
pub fn fits_in_page(addr: u32, len: usize) -> bool {
    len >= 1 && len <= page_remaining(addr)
}

/// Parse a byte size or offset
///
/// Accepts decimal or `0x` hex digits with an optional `k` (KiB) or `M`
/// (MiB) suffix. Returns `None` for anything else, including results that
/// do not fit in 32 bits.
pub fn parse_size(s: &str) -> Option<u32> {
    let (digits, multiplier) = if let Some(d) = s.strip_suffix('k') {
        (d, 1024)
    } else if let Some(d) = s.strip_suffix('M') {
        (d, 1024 * 1024)
    } else {
        (s, 1)
    };

    let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()?
    } else {
        digits.parse::<u32>().ok()?
    };

    value.checked_mul(multiplier)
}

/// The erase and program layout of one write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgrammingPlan {
    offset: u32,
    length: u32,
}

impl ProgrammingPlan {
    /// Plan a write of `length` bytes at `offset`
    ///
    /// Fails when the write would run past the 24-bit address space.
    pub fn new(offset: u32, length: usize) -> Result<Self> {
        let end = offset as u64 + length as u64;
        if offset >= ADDRESS_SPACE && length > 0 || end > ADDRESS_SPACE as u64 {
            return Err(Error::InvalidAddress(end.min(u32::MAX as u64) as u32));
        }
        Ok(ProgrammingPlan {
            offset,
            length: length as u32,
        })
    }

    /// Start address of the write
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Length of the write in bytes
    pub fn length(&self) -> u32 {
        self.length
    }

    /// The sector-aligned range that must be erased before programming
    pub fn erase_extent(&self) -> SectorExtent {
        let mask = SECTOR_SIZE - 1;
        let begin = self.offset & !mask;
        let end = (self.offset + self.length + mask) & !mask;
        SectorExtent { begin, end }
    }

    /// The individual 64 KiB sectors of [`erase_extent`](Self::erase_extent)
    pub fn sectors(&self) -> impl Iterator<Item = SectorExtent> {
        self.erase_extent().sectors()
    }

    /// The page-bounded spans the data is programmed in
    pub fn pages(&self) -> Pages {
        Pages {
            next: self.offset,
            end: self.offset + self.length,
        }
    }
}

/// Iterator over the [`PageSpan`]s of a plan
#[derive(Debug, Clone)]
pub struct Pages {
    next: u32,
    end: u32,
}

impl Iterator for Pages {
    type Item = PageSpan;

    fn next(&mut self) -> Option<PageSpan> {
        if self.next >= self.end {
            return None;
        }
        let len = page_remaining(self.next).min((self.end - self.next) as usize);
        let span = PageSpan {
            addr: self.next,
            len,
        };
        self.next += len as u32;
        Some(span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flash_address() {
        assert_eq!(FlashAddress::new(0x123456).unwrap().to_bytes(), [0x12, 0x34, 0x56]);
        assert_eq!(FlashAddress::new(0xFFFFFF).unwrap().get(), 0xFFFFFF);
        assert!(matches!(
            FlashAddress::new(0x1000000),
            Err(Error::InvalidAddress(0x1000000))
        ));
    }

    #[test]
    fn test_erase_extent_small_write() {
        let plan = ProgrammingPlan::new(0, 10).unwrap();
        let extent = plan.erase_extent();
        assert_eq!(extent, SectorExtent { begin: 0, end: 0x10000 });
        assert_eq!(plan.sectors().count(), 1);
    }

    #[test]
    fn test_erase_extent_straddles_sectors() {
        let plan = ProgrammingPlan::new(0xFFF0, 0x20).unwrap();
        let sectors: Vec<_> = plan.sectors().collect();
        assert_eq!(
            sectors,
            vec![
                SectorExtent { begin: 0, end: 0x10000 },
                SectorExtent { begin: 0x10000, end: 0x20000 },
            ]
        );
    }

    #[test]
    fn test_erase_extent_aligned_empty() {
        let plan = ProgrammingPlan::new(0x20000, 0).unwrap();
        assert!(plan.erase_extent().is_empty());
        assert_eq!(plan.sectors().count(), 0);

        let plan = ProgrammingPlan::new(0x20010, 0).unwrap();
        assert_eq!(plan.erase_extent().sector_count(), 1);
    }

    #[test]
    fn test_erase_extent_properties() {
        let offsets = [0u32, 1, 0xFF, 0x100, 0xFFFF, 0x10000, 0x12345, 0xFE0000];
        let lengths = [0usize, 1, 10, 255, 256, 0x10000, 0x10001, 0x1FFFF];
        for &offset in &offsets {
            for &length in &lengths {
                let plan = ProgrammingPlan::new(offset, length).unwrap();
                let e = plan.erase_extent();
                assert_eq!(e.begin, offset & !0xFFFF);
                assert!(e.begin <= offset);
                assert!(e.end >= offset + length as u32);
                assert_eq!(e.len() % 0x10000, 0);
                assert_eq!(e.end % 0x10000, 0);
            }
        }
    }

    #[test]
    fn test_pages_never_cross_boundary() {
        let offsets = [0u32, 1, 0x80, 0xFF, 0x100, 0x1234];
        let lengths = [1usize, 10, 255, 256, 257, 1000];
        for &offset in &offsets {
            for &length in &lengths {
                let plan = ProgrammingPlan::new(offset, length).unwrap();
                let mut total = 0;
                let mut expected = offset;
                for span in plan.pages() {
                    assert!(span.len >= 1 && span.len <= 256);
                    assert_eq!(span.addr, expected);
                    assert_eq!(
                        (span.addr + span.len as u32 - 1) / 256,
                        span.addr / 256,
                        "span {:?} crosses a page",
                        span
                    );
                    expected += span.len as u32;
                    total += span.len;
                }
                assert_eq!(total, length);
            }
        }
    }

    #[test]
    fn test_pages_unaligned_start() {
        let plan = ProgrammingPlan::new(0xF0, 0x30).unwrap();
        let spans: Vec<_> = plan.pages().collect();
        assert_eq!(
            spans,
            vec![
                PageSpan { addr: 0xF0, len: 0x10 },
                PageSpan { addr: 0x100, len: 0x20 },
            ]
        );
    }

    #[test]
    fn test_page_remaining() {
        assert_eq!(page_remaining(0), 256);
        assert_eq!(page_remaining(0x1FF), 1);
        assert_eq!(page_remaining(0x180), 128);
        assert!(fits_in_page(0x100, 256));
        assert!(!fits_in_page(0x101, 256));
        assert!(!fits_in_page(0x100, 0));
    }

    #[test]
    fn test_plan_rejects_overflow() {
        assert!(ProgrammingPlan::new(0xFFFF00, 0x100).is_ok());
        assert!(ProgrammingPlan::new(0xFFFF00, 0x101).is_err());
        assert!(ProgrammingPlan::new(0x1000000, 1).is_err());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1234"), Some(1234));
        assert_eq!(parse_size("0x100"), Some(0x100));
        assert_eq!(parse_size("0X100"), Some(0x100));
        assert_eq!(parse_size("64k"), Some(64 * 1024));
        assert_eq!(parse_size("0x10k"), Some(16 * 1024));
        assert_eq!(parse_size("2M"), Some(2 * 1024 * 1024));
        assert_eq!(parse_size("8K"), None);
        assert_eq!(parse_size("k"), None);
        assert_eq!(parse_size("12x"), None);
        assert_eq!(parse_size("-1"), None);
        assert_eq!(parse_size("8192M"), None);
    }

    #[test]
    fn test_plan_accessors() {
        let plan = ProgrammingPlan::new(0x12345, 600).unwrap();
        assert_eq!(plan.offset(), 0x12345);
        assert_eq!(plan.length(), 600);
        assert_eq!(plan.pages().next().unwrap().addr, plan.offset());
    }
}
