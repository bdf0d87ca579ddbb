//! Linux SPI device implementation
//!
//! This module provides the `LinuxSpi` struct that implements [`Transport`]
//! using Linux's spidev interface for data and the GPIO character device for
//! the control lines.

use crate::error::{LinuxSpiError, Result};
use crate::gpio::{ControlLines, GpioLines, DEFAULT_CHIP};

use iceprog_core::error::Result as CoreResult;
use iceprog_core::transport::{bit_mask, check_bit_count, Transport, FAST_CLOCK_HZ, SLOW_CLOCK_HZ};

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;

/// Path to kernel spidev buffer size parameter
const BUF_SIZE_SYSFS: &str = "/sys/module/spidev/parameters/bufsiz";

/// Default spidev node
pub const DEFAULT_DEVICE: &str = "/dev/spidev0.0";

/// SPI mode constants
pub mod mode {
    /// SPI mode 0: CPOL=0, CPHA=0
    pub const MODE_0: u8 = 0;
    /// SPI mode 1: CPOL=0, CPHA=1
    pub const MODE_1: u8 = 1;
    /// SPI mode 2: CPOL=1, CPHA=0
    pub const MODE_2: u8 = 2;
    /// SPI mode 3: CPOL=1, CPHA=1
    pub const MODE_3: u8 = 3;
}

/// Linux spidev ioctl constants
mod ioctl {
    use nix::ioctl_read;
    use nix::ioctl_write_ptr;

    // SPI ioctl magic number
    pub const SPI_IOC_MAGIC: u8 = b'k';

    // SPI ioctl type numbers
    const SPI_IOC_TYPE_MODE: u8 = 1;
    const SPI_IOC_TYPE_LSB_FIRST: u8 = 2;
    const SPI_IOC_TYPE_BITS_PER_WORD: u8 = 3;
    const SPI_IOC_TYPE_MAX_SPEED_HZ: u8 = 4;

    ioctl_read!(spi_ioc_rd_mode, SPI_IOC_MAGIC, SPI_IOC_TYPE_MODE, u8);
    ioctl_write_ptr!(spi_ioc_wr_mode, SPI_IOC_MAGIC, SPI_IOC_TYPE_MODE, u8);
    ioctl_read!(
        spi_ioc_rd_lsb_first,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_LSB_FIRST,
        u8
    );
    ioctl_write_ptr!(
        spi_ioc_wr_lsb_first,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_LSB_FIRST,
        u8
    );
    ioctl_read!(
        spi_ioc_rd_bits_per_word,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_BITS_PER_WORD,
        u8
    );
    ioctl_write_ptr!(
        spi_ioc_wr_bits_per_word,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_BITS_PER_WORD,
        u8
    );
    ioctl_read!(
        spi_ioc_rd_max_speed_hz,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_MAX_SPEED_HZ,
        u32
    );
    ioctl_write_ptr!(
        spi_ioc_wr_max_speed_hz,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_MAX_SPEED_HZ,
        u32
    );

    // SPI_IOC_MESSAGE(n) = _IOW(SPI_IOC_MAGIC, 0, char[n * sizeof(struct spi_ioc_transfer)])

    /// Size of spi_ioc_transfer struct
    pub const SPI_IOC_TRANSFER_SIZE: usize = 32;

    /// Calculate ioctl number for SPI_IOC_MESSAGE(n)
    pub fn spi_ioc_message(n: u8) -> libc::c_ulong {
        let size = (n as usize) * SPI_IOC_TRANSFER_SIZE;
        // _IOC(dir, type, nr, size) = ((dir)<<30)|((size)<<16)|((type)<<8)|(nr), _IOC_WRITE = 1
        ((1u32 << 30) | ((size as u32) << 16) | ((SPI_IOC_MAGIC as u32) << 8)) as libc::c_ulong
    }
}

fn errno_to_io(e: nix::errno::Errno) -> std::io::Error {
    std::io::Error::from_raw_os_error(e as i32)
}

/// SPI transfer structure for ioctl
/// This must match the kernel's struct spi_ioc_transfer layout
#[repr(C)]
#[derive(Debug, Default, Clone)]
struct SpiIocTransfer {
    tx_buf: u64,          // __u64 tx_buf
    rx_buf: u64,          // __u64 rx_buf
    len: u32,             // __u32 len
    speed_hz: u32,        // __u32 speed_hz
    delay_usecs: u16,     // __u16 delay_usecs
    bits_per_word: u8,    // __u8 bits_per_word
    cs_change: u8,        // __u8 cs_change
    tx_nbits: u8,         // __u8 tx_nbits
    rx_nbits: u8,         // __u8 rx_nbits
    word_delay_usecs: u8, // __u8 word_delay_usecs
    _pad: u8,             // padding
}

impl SpiIocTransfer {
    fn new(len: usize, speed_hz: u32) -> Self {
        Self {
            len: len as u32,
            speed_hz,
            bits_per_word: 8,
            ..Default::default()
        }
    }

    /// Transmit only
    fn tx(buf: &[u8], speed_hz: u32) -> Self {
        Self {
            tx_buf: buf.as_ptr() as u64,
            ..Self::new(buf.len(), speed_hz)
        }
    }

    /// Receive only, zeros are clocked out
    fn rx(buf: &mut [u8], speed_hz: u32) -> Self {
        Self {
            rx_buf: buf.as_mut_ptr() as u64,
            ..Self::new(buf.len(), speed_hz)
        }
    }

    /// Full duplex, the response overwrites `buf`
    fn duplex(buf: &mut [u8], speed_hz: u32) -> Self {
        Self {
            tx_buf: buf.as_ptr() as u64,
            rx_buf: buf.as_mut_ptr() as u64,
            ..Self::new(buf.len(), speed_hz)
        }
    }
}

/// Left-align the low `nbits` bits of `value` in a byte
fn pad_bits(value: u8, nbits: u8) -> u8 {
    value << (8 - nbits)
}

/// Recover the first `nbits` captured bits from a response byte
fn unpad_bits(response: u8, nbits: u8) -> u8 {
    (response >> (8 - nbits)) & bit_mask(nbits)
}

/// Whole bytes needed to clock at least `nbits`
fn trailer_bytes(nbits: u32) -> usize {
    nbits.div_ceil(8) as usize
}

/// Configuration for opening a Linux SPI device
#[derive(Debug, Clone)]
pub struct LinuxSpiConfig {
    /// Device path (e.g., "/dev/spidev0.0")
    pub device: String,
    /// GPIO chip path (e.g., "/dev/gpiochip0")
    pub gpio_chip: String,
    /// Control line offsets on `gpio_chip`
    pub lines: GpioLines,
    /// SPI mode (0-3, default: 3)
    pub mode: u8,
}

impl Default for LinuxSpiConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            gpio_chip: DEFAULT_CHIP.to_string(),
            lines: GpioLines::default(),
            mode: mode::MODE_3,
        }
    }
}

impl LinuxSpiConfig {
    /// Create a new configuration with the given device path
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Default::default()
        }
    }

    /// Set the SPI mode (0-3)
    pub fn with_mode(mut self, mode: u8) -> Self {
        self.mode = mode;
        self
    }

    /// Set the GPIO chip and control line offsets
    pub fn with_gpio(mut self, chip: impl Into<String>, lines: GpioLines) -> Self {
        self.gpio_chip = chip.into();
        self.lines = lines;
        self
    }
}

/// Settings found at open, restored at close
#[derive(Debug, Clone, Copy)]
struct SavedSettings {
    mode: u8,
    speed_hz: u32,
}

/// Linux SPI transport using spidev and GPIO
pub struct LinuxSpi {
    /// File handle for spidev device
    file: File,
    /// Control lines, `None` once closed
    lines: Option<ControlLines>,
    /// Maximum kernel buffer size
    max_kernel_buf_size: usize,
    /// Clock for every descriptor
    speed_hz: u32,
    /// Mode and speed to restore, `None` once restored
    saved: Option<SavedSettings>,
}

impl LinuxSpi {
    /// Open a Linux SPI device with the given configuration
    pub fn open(config: &LinuxSpiConfig) -> Result<Self> {
        if config.mode > mode::MODE_3 {
            return Err(LinuxSpiError::InvalidParameter(format!(
                "Invalid SPI mode: {} (must be 0-3)",
                config.mode
            )));
        }

        log::debug!("linux_spi: Opening device {}", config.device);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&config.device)
            .map_err(|e| LinuxSpiError::OpenFailed {
                path: config.device.clone(),
                source: e,
            })?;

        let fd = file.as_raw_fd();
        let mut saved = SavedSettings {
            mode: 0,
            speed_hz: 0,
        };
        unsafe {
            ioctl::spi_ioc_rd_mode(fd, &mut saved.mode).map_err(|e| {
                LinuxSpiError::ReadSettingFailed {
                    setting: "SPI mode",
                    source: errno_to_io(e),
                }
            })?;
            ioctl::spi_ioc_rd_max_speed_hz(fd, &mut saved.speed_hz).map_err(|e| {
                LinuxSpiError::ReadSettingFailed {
                    setting: "max speed",
                    source: errno_to_io(e),
                }
            })?;
        }

        // From here on a failed step drops `spi`, which restores mode and speed
        let mut spi = Self {
            file,
            lines: None,
            max_kernel_buf_size: 0,
            speed_hz: FAST_CLOCK_HZ,
            saved: Some(saved),
        };

        let mode = config.mode;
        unsafe {
            ioctl::spi_ioc_wr_mode(fd, &mode).map_err(|e| LinuxSpiError::SetModeFailed {
                mode,
                source: errno_to_io(e),
            })?;
        }

        // MSB first
        let lsb_first: u8 = 0;
        unsafe {
            ioctl::spi_ioc_wr_lsb_first(fd, &lsb_first).map_err(|e| {
                LinuxSpiError::SetLsbFirstFailed {
                    lsb_first,
                    source: errno_to_io(e),
                }
            })?;
        }

        let bits: u8 = 8;
        unsafe {
            ioctl::spi_ioc_wr_bits_per_word(fd, &bits).map_err(|e| {
                LinuxSpiError::SetBitsPerWordFailed {
                    bits,
                    source: errno_to_io(e),
                }
            })?;
        }

        let speed = FAST_CLOCK_HZ;
        unsafe {
            ioctl::spi_ioc_wr_max_speed_hz(fd, &speed).map_err(|e| {
                LinuxSpiError::SetSpeedFailed {
                    speed,
                    source: errno_to_io(e),
                }
            })?;
        }

        log_settings(fd);

        spi.max_kernel_buf_size = get_max_kernel_buf_size();
        log::debug!(
            "linux_spi: Max kernel buffer size: {} bytes",
            spi.max_kernel_buf_size
        );

        spi.lines = Some(ControlLines::request(&config.gpio_chip, config.lines)?);

        log::info!(
            "linux_spi: Opened {} (mode={}, speed={} kHz)",
            config.device,
            mode,
            speed / 1000
        );

        Ok(spi)
    }

    fn lines(&mut self) -> Result<&mut ControlLines> {
        self.lines.as_mut().ok_or(LinuxSpiError::Closed)
    }

    /// Run one SPI_IOC_MESSAGE with the given descriptors
    fn message(&mut self, transfers: &[SpiIocTransfer]) -> Result<()> {
        if self.lines.is_none() {
            return Err(LinuxSpiError::Closed);
        }
        let fd = self.file.as_raw_fd();
        let ioctl_num = ioctl::spi_ioc_message(transfers.len() as u8);
        let ret = unsafe { libc::ioctl(fd, ioctl_num, transfers.as_ptr()) };

        if ret < 0 {
            return Err(LinuxSpiError::TransferFailed(
                std::io::Error::last_os_error(),
            ));
        }
        Ok(())
    }

    fn write_speed(&mut self, speed_hz: u32) -> Result<()> {
        let fd = self.file.as_raw_fd();
        unsafe {
            ioctl::spi_ioc_wr_max_speed_hz(fd, &speed_hz).map_err(|e| {
                LinuxSpiError::SetSpeedFailed {
                    speed: speed_hz,
                    source: errno_to_io(e),
                }
            })?;
        }
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.lines = None;
        let Some(saved) = self.saved.take() else {
            return Ok(());
        };
        let fd = self.file.as_raw_fd();
        let mode = saved.mode;
        unsafe {
            ioctl::spi_ioc_wr_mode(fd, &mode).map_err(|e| LinuxSpiError::SetModeFailed {
                mode,
                source: errno_to_io(e),
            })?;
        }
        self.write_speed(saved.speed_hz)?;
        log::debug!("linux_spi: closed");
        Ok(())
    }
}

impl Drop for LinuxSpi {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("linux_spi: Failed to restore settings on close: {}", e);
        }
    }
}

impl Transport for LinuxSpi {
    fn set_control_lines(&mut self, select: bool, reset: bool) -> CoreResult<()> {
        Ok(self.lines()?.set(select, reset)?)
    }

    fn read_ready_line(&mut self) -> CoreResult<bool> {
        Ok(self.lines()?.done()?)
    }

    fn write_only(&mut self, data: &[u8]) -> CoreResult<()> {
        let chunk_size = self.max_kernel_buf_size;
        for chunk in data.chunks(chunk_size) {
            let transfer = SpiIocTransfer::tx(chunk, self.speed_hz);
            self.message(&[transfer])?;
        }
        Ok(())
    }

    fn transfer(&mut self, data: &mut [u8]) -> CoreResult<()> {
        let chunk_size = self.max_kernel_buf_size;
        for chunk in data.chunks_mut(chunk_size) {
            let transfer = SpiIocTransfer::duplex(chunk, self.speed_hz);
            self.message(&[transfer])?;
        }
        Ok(())
    }

    fn write_then_read(&mut self, tx: &[u8], rx: &mut [u8]) -> CoreResult<()> {
        if tx.len() + rx.len() > self.max_kernel_buf_size {
            self.write_only(tx)?;
            rx.fill(0);
            return self.transfer(rx);
        }
        let transfers = [
            SpiIocTransfer::tx(tx, self.speed_hz),
            SpiIocTransfer::rx(rx, self.speed_hz),
        ];
        Ok(self.message(&transfers)?)
    }

    fn transfer_bits(&mut self, value: u8, nbits: u8) -> CoreResult<u8> {
        check_bit_count(nbits)?;
        let mut buf = [pad_bits(value & bit_mask(nbits), nbits)];
        self.transfer(&mut buf)?;
        Ok(unpad_bits(buf[0], nbits))
    }

    fn set_clock_rate(&mut self, slow: bool) -> CoreResult<()> {
        let speed_hz = if slow { SLOW_CLOCK_HZ } else { FAST_CLOCK_HZ };
        self.write_speed(speed_hz)?;
        self.speed_hz = speed_hz;
        log::debug!("linux_spi: Set speed to {} Hz", speed_hz);
        Ok(())
    }

    fn send_trailer_bits(&mut self, nbits: u32) -> CoreResult<()> {
        let zeros = vec![0u8; trailer_bytes(nbits)];
        self.write_only(&zeros)
    }

    fn close(&mut self) -> CoreResult<()> {
        Ok(self.shutdown()?)
    }
}

/// Log the settings the driver actually accepted
fn log_settings(fd: libc::c_int) {
    let mut mode: u8 = 0;
    let mut lsb_first: u8 = 0;
    let mut bits: u8 = 0;
    let mut speed: u32 = 0;
    let ok = unsafe {
        ioctl::spi_ioc_rd_mode(fd, &mut mode).is_ok()
            && ioctl::spi_ioc_rd_lsb_first(fd, &mut lsb_first).is_ok()
            && ioctl::spi_ioc_rd_bits_per_word(fd, &mut bits).is_ok()
            && ioctl::spi_ioc_rd_max_speed_hz(fd, &mut speed).is_ok()
    };
    if ok {
        log::debug!(
            "linux_spi: mode={} lsb_first={} bits_per_word={} max_speed={} Hz",
            mode,
            lsb_first,
            bits,
            speed
        );
    } else {
        log::warn!("linux_spi: Failed to read back SPI settings");
    }
}

/// Read the maximum kernel buffer size from sysfs, or use page size as fallback
fn get_max_kernel_buf_size() -> usize {
    if let Ok(content) = std::fs::read_to_string(BUF_SIZE_SYSFS) {
        if let Ok(size) = content.trim().parse::<usize>() {
            if size > 0 {
                log::debug!("linux_spi: Using buffer size {} from sysfs", size);
                return size;
            }
        }
        log::warn!("linux_spi: Invalid buffer size in {}", BUF_SIZE_SYSFS);
    } else {
        log::debug!("linux_spi: Cannot read {}, using page size", BUF_SIZE_SYSFS);
    }

    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size > 0 {
        page_size as usize
    } else {
        4096
    }
}

/// Parse programmer options from a list of key-value pairs
///
/// Supported keys: `dev`, `gpiochip` (path or chip number), `reset`,
/// `select`, `done` (line offsets) and `mode`.
pub fn parse_options(options: &[(&str, &str)]) -> Result<LinuxSpiConfig> {
    let mut config = LinuxSpiConfig::default();

    let parse_line = |name: &str, value: &str| {
        value.parse::<u32>().map_err(|_| {
            LinuxSpiError::InvalidParameter(format!("Invalid GPIO line for {}: {}", name, value))
        })
    };

    for (key, value) in options {
        match *key {
            "dev" => {
                config.device = value.to_string();
            }
            "gpiochip" => {
                config.gpio_chip = if value.chars().all(|c| c.is_ascii_digit()) {
                    format!("/dev/gpiochip{}", value)
                } else {
                    value.to_string()
                };
            }
            "reset" => config.lines.reset = parse_line(*key, *value)?,
            "select" | "cs" => config.lines.select = parse_line(*key, *value)?,
            "done" => config.lines.done = parse_line(*key, *value)?,
            "mode" => {
                let mode: u8 = value.parse().map_err(|_| {
                    LinuxSpiError::InvalidParameter(format!("Invalid mode value: {}", value))
                })?;
                if mode > mode::MODE_3 {
                    return Err(LinuxSpiError::InvalidParameter(format!(
                        "Invalid SPI mode: {} (must be 0-3)",
                        mode
                    )));
                }
                config.mode = mode;
            }
            _ => {
                log::warn!("linux_spi: Unknown option: {}={}", key, value);
            }
        }
    }

    if config.device.is_empty() {
        return Err(LinuxSpiError::InvalidParameter(
            "No device specified. Use dev=/dev/spidevX.Y".to_string(),
        ));
    }

    let lines = config.lines;
    if lines.reset == lines.select || lines.reset == lines.done || lines.select == lines.done {
        return Err(LinuxSpiError::InvalidParameter(format!(
            "GPIO lines must be distinct (reset={}, select={}, done={})",
            lines.reset, lines.select, lines.done
        )));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_struct_layout() {
        assert_eq!(
            std::mem::size_of::<SpiIocTransfer>(),
            ioctl::SPI_IOC_TRANSFER_SIZE
        );
    }

    #[test]
    fn test_spi_ioc_message() {
        assert_eq!(ioctl::spi_ioc_message(1), 0x4020_6b00);
        assert_eq!(ioctl::spi_ioc_message(2), 0x4040_6b00);
    }

    #[test]
    fn test_descriptors() {
        let tx = [0x9Fu8];
        let mut rx = [0u8; 4];

        let t = SpiIocTransfer::tx(&tx, 6_000_000);
        assert_eq!(t.tx_buf, tx.as_ptr() as u64);
        assert_eq!(t.rx_buf, 0);
        assert_eq!(t.len, 1);
        assert_eq!(t.speed_hz, 6_000_000);
        assert_eq!(t.bits_per_word, 8);
        assert_eq!(t.cs_change, 0);

        let r = SpiIocTransfer::rx(&mut rx, 50_000);
        assert_eq!(r.tx_buf, 0);
        assert_eq!(r.len, 4);
        assert_eq!(r.speed_hz, 50_000);

        let d = SpiIocTransfer::duplex(&mut rx, 50_000);
        assert_eq!(d.tx_buf, d.rx_buf);
        assert_eq!(d.len, 4);
    }

    #[test]
    fn test_bit_padding() {
        assert_eq!(pad_bits(0x05, 4), 0x50);
        assert_eq!(pad_bits(0x03, 2), 0xC0);
        assert_eq!(pad_bits(0xA5, 8), 0xA5);
        assert_eq!(unpad_bits(0xAF, 4), 0x0A);
        assert_eq!(unpad_bits(0xFF, 2), 0x03);
        assert_eq!(unpad_bits(0x3C, 8), 0x3C);
    }

    #[test]
    fn test_trailer_bytes() {
        assert_eq!(trailer_bytes(49), 7);
        assert_eq!(trailer_bytes(48), 6);
        assert_eq!(trailer_bytes(1), 1);
        assert_eq!(trailer_bytes(0), 0);
    }

    #[test]
    fn test_parse_options_defaults() {
        let config = parse_options(&[]).unwrap();
        assert_eq!(config.device, "/dev/spidev0.0");
        assert_eq!(config.gpio_chip, "/dev/gpiochip0");
        assert_eq!(config.lines, GpioLines::default());
        assert_eq!(config.mode, 3);
    }

    #[test]
    fn test_parse_options() {
        let config = parse_options(&[
            ("dev", "/dev/spidev1.0"),
            ("gpiochip", "2"),
            ("reset", "24"),
            ("select", "25"),
            ("done", "23"),
            ("mode", "0"),
        ])
        .unwrap();
        assert_eq!(config.device, "/dev/spidev1.0");
        assert_eq!(config.gpio_chip, "/dev/gpiochip2");
        assert_eq!(
            config.lines,
            GpioLines {
                reset: 24,
                select: 25,
                done: 23
            }
        );
        assert_eq!(config.mode, 0);

        let config = parse_options(&[("gpiochip", "/dev/gpiochip4")]).unwrap();
        assert_eq!(config.gpio_chip, "/dev/gpiochip4");
    }

    #[test]
    fn test_config_builder() {
        let lines = GpioLines {
            reset: 5,
            select: 6,
            done: 13,
        };
        let config = LinuxSpiConfig::new("/dev/spidev1.1")
            .with_mode(mode::MODE_0)
            .with_gpio("/dev/gpiochip1", lines);
        assert_eq!(config.device, "/dev/spidev1.1");
        assert_eq!(config.gpio_chip, "/dev/gpiochip1");
        assert_eq!(config.lines, lines);
        assert_eq!(config.mode, 0);
    }

    #[test]
    fn test_parse_options_errors() {
        assert!(parse_options(&[("mode", "4")]).is_err());
        assert!(parse_options(&[("reset", "x")]).is_err());
        assert!(parse_options(&[("dev", "")]).is_err());
        assert!(parse_options(&[("select", "17")]).is_err());
    }

    /// A transport that has saved settings but no control lines yet, as
    /// left by an open that failed while requesting the GPIO lines
    fn half_open() -> LinuxSpi {
        LinuxSpi {
            file: File::open("/dev/null").unwrap(),
            lines: None,
            max_kernel_buf_size: 4096,
            speed_hz: FAST_CLOCK_HZ,
            saved: Some(SavedSettings {
                mode: mode::MODE_0,
                speed_hz: 500_000,
            }),
        }
    }

    #[test]
    fn test_restore_runs_without_control_lines() {
        let mut spi = half_open();
        // /dev/null rejects the mode ioctl, which shows the restore was attempted
        assert!(matches!(
            spi.shutdown(),
            Err(LinuxSpiError::SetModeFailed { mode: 0, .. })
        ));
        assert!(spi.saved.is_none());
        spi.shutdown().unwrap();
    }

    #[test]
    fn test_half_open_transport_rejects_transfers() {
        let mut spi = half_open();
        assert!(matches!(
            spi.message(&[]),
            Err(LinuxSpiError::Closed)
        ));
    }
}
