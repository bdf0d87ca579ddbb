//! FTDI MPSSE device implementation
//!
//! This module provides the `Ftdi` struct that implements [`Transport`]
//! on top of libftdi.

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;
use std::time::{Duration, Instant};

use ftdi::{find_by_vid_pid, BitMode, Device, Interface};
use iceprog_core::error::Result as CoreResult;
use iceprog_core::transport::{bit_mask, check_bit_count, Transport};

use crate::error::{FtdiError, Result};
use crate::protocol::*;

/// Latency timer while the transport is open, in milliseconds
const LATENCY_MS: u8 = 1;

/// Give up on a read when no byte has arrived for this long
const READ_STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Sleep between polls of an empty receive buffer
const READ_POLL_INTERVAL: Duration = Duration::from_micros(100);

/// A libftdi-style `i:<vid>:<pid>` device string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceString {
    /// USB vendor ID
    pub vendor_id: u16,
    /// USB product ID
    pub product_id: u16,
}

impl FromStr for DeviceString {
    type Err = FtdiError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || {
            FtdiError::InvalidParameter(format!(
                "Invalid device string '{}': expected i:<vid>:<pid>",
                s
            ))
        };

        let mut parts = s.split(':');
        if parts.next() != Some("i") {
            return Err(invalid());
        }
        let vendor_id = parts.next().and_then(parse_id).ok_or_else(invalid)?;
        let product_id = parts.next().and_then(parse_id).ok_or_else(invalid)?;
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(DeviceString {
            vendor_id,
            product_id,
        })
    }
}

impl fmt::Display for DeviceString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i:0x{:04x}:0x{:04x}", self.vendor_id, self.product_id)
    }
}

fn parse_id(s: &str) -> Option<u16> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

/// Configuration for opening an FTDI device
#[derive(Debug, Clone, Default)]
pub struct FtdiConfig {
    /// Explicit device, or `None` to probe the FT2232H and FT232H IDs
    pub device: Option<DeviceString>,
    /// Interface/channel to use (A, B, C, D)
    pub interface: FtdiInterface,
}

impl FtdiConfig {
    /// Candidate VID/PID pairs, in the order they are tried
    pub fn candidates(&self) -> Vec<(u16, u16)> {
        match self.device {
            Some(dev) => vec![(dev.vendor_id, dev.product_id)],
            None => DEFAULT_DEVICES.to_vec(),
        }
    }
}

/// FTDI MPSSE transport
///
/// Holds the libftdi context for as long as the transport is open. The
/// latency timer found at open is restored on close.
pub struct Ftdi {
    /// libftdi device context, `None` once closed
    device: Option<Device>,
    /// Latency timer value to restore on close
    saved_latency: u8,
}

impl Ftdi {
    /// Open an FTDI device with the given configuration
    pub fn open(config: &FtdiConfig) -> Result<Self> {
        let interface = match config.interface {
            FtdiInterface::A => Interface::A,
            FtdiInterface::B => Interface::B,
            FtdiInterface::C => Interface::C,
            FtdiInterface::D => Interface::D,
        };

        let candidates = config.candidates();
        let mut opened = None;
        for &(vid, pid) in &candidates {
            log::debug!("Looking for FTDI device VID={:04X} PID={:04X}", vid, pid);
            match find_by_vid_pid(vid, pid).interface(interface).open() {
                Ok(device) => {
                    log::info!("Opened FTDI device VID={:04X} PID={:04X} channel {}", vid, pid, config.interface.letter());
                    opened = Some(device);
                    break;
                }
                Err(e) => log::debug!("{:04X}:{:04X}: {}", vid, pid, e),
            }
        }
        let mut device = opened.ok_or_else(|| {
            let tried: Vec<String> = candidates
                .iter()
                .map(|(vid, pid)| format!("{:04x}:{:04x}", vid, pid))
                .collect();
            FtdiError::DeviceNotFound(tried.join(", "))
        })?;

        device
            .usb_reset()
            .map_err(|e| FtdiError::ConfigFailed(format!("Failed to reset iCE FTDI USB device: {}", e)))?;

        device
            .usb_purge_buffers()
            .map_err(|e| FtdiError::ConfigFailed(format!("Failed to purge buffers on iCE FTDI USB device: {}", e)))?;

        let saved_latency = device
            .latency_timer()
            .map_err(|e| FtdiError::ConfigFailed(format!("Failed to get latency timer: {}", e)))?;

        // From here on a failed step drops `ftdi`, which restores the device
        let mut ftdi = Ftdi {
            device: Some(device),
            saved_latency,
        };

        ftdi.device()?
            .set_latency_timer(LATENCY_MS)
            .map_err(|e| FtdiError::ConfigFailed(format!("Failed to set latency timer: {}", e)))?;

        ftdi.device()?
            .set_bitmode(0xFF, BitMode::Mpsse)
            .map_err(|e| FtdiError::ConfigFailed(format!("Failed to set BITMODE_MPSSE on iCE FTDI USB device: {}", e)))?;

        // 12 MHz base clock
        ftdi.send(&[EN_DIV_5])?;

        Ok(ftdi)
    }

    fn device(&mut self) -> Result<&mut Device> {
        self.device.as_mut().ok_or(FtdiError::Closed)
    }

    /// Send data to the FTDI device
    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.device()?
            .write_all(data)
            .map_err(|e| FtdiError::TransferFailed(format!("Write error (chunk size {}): {}", data.len(), e)))?;
        log::trace!("Sent {} bytes", data.len());
        Ok(())
    }

    /// Receive exactly `buf.len()` bytes
    fn recv(&mut self, buf: &mut [u8]) -> Result<()> {
        let device = self.device()?;
        let mut total = 0;
        let mut last_progress = Instant::now();

        while total < buf.len() {
            match device.read(&mut buf[total..]) {
                Ok(0) => {
                    if last_progress.elapsed() > READ_STALL_TIMEOUT {
                        return Err(FtdiError::ReadStalled {
                            expected: buf.len(),
                            received: total,
                        });
                    }
                    std::thread::sleep(READ_POLL_INTERVAL);
                }
                Ok(n) => {
                    total += n;
                    last_progress = Instant::now();
                }
                Err(e) => {
                    return Err(FtdiError::TransferFailed(format!("Read error: {}", e)));
                }
            }
        }

        log::trace!("Received {} bytes", total);
        Ok(())
    }

    fn recv_byte(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.recv(&mut byte)?;
        Ok(byte[0])
    }

    fn cdone(&mut self) -> Result<bool> {
        self.send(&encode_read_pins())?;
        Ok(cdone_high(self.recv_byte()?))
    }

    /// Log and discard anything left in the receive buffer
    fn drain(&mut self) {
        let Some(device) = self.device.as_mut() else {
            return;
        };
        let mut buf = [0u8; 64];
        while let Ok(n) = device.read(&mut buf) {
            if n == 0 {
                break;
            }
            for b in &buf[..n] {
                log::error!("unexpected rx byte: {:02X}", b);
            }
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(mut device) = self.device.take() else {
            return Ok(());
        };
        restore(&mut device, self.saved_latency)?;
        log::debug!("ftdi: closed");
        Ok(())
    }
}

/// Device state changed by [`Ftdi::open`]
trait RestoreState {
    fn restore_latency(&mut self, latency: u8) -> Result<()>;
    fn reset_bitmode(&mut self) -> Result<()>;
}

impl RestoreState for Device {
    fn restore_latency(&mut self, latency: u8) -> Result<()> {
        Ok(self.set_latency_timer(latency)?)
    }

    fn reset_bitmode(&mut self) -> Result<()> {
        Ok(self.set_bitmode(0, BitMode::Reset)?)
    }
}

/// Put the latency timer back and leave MPSSE mode
///
/// Both steps are attempted even if the first one fails.
fn restore<D: RestoreState>(device: &mut D, saved_latency: u8) -> Result<()> {
    let latency = device.restore_latency(saved_latency);
    let bitmode = device.reset_bitmode();
    latency?;
    bitmode
}

impl Drop for Ftdi {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("Failed to restore FTDI state on close: {}", e);
        }
    }
}

impl Transport for Ftdi {
    fn set_control_lines(&mut self, select: bool, reset: bool) -> CoreResult<()> {
        Ok(self.send(&encode_lines(select, reset))?)
    }

    fn read_ready_line(&mut self) -> CoreResult<bool> {
        Ok(self.cdone()?)
    }

    fn write_only(&mut self, data: &[u8]) -> CoreResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::with_capacity(data.len() + 3);
        encode_write(&mut buf, data);
        Ok(self.send(&buf)?)
    }

    fn transfer(&mut self, data: &mut [u8]) -> CoreResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::with_capacity(data.len() + 3);
        encode_transfer(&mut buf, data);
        self.send(&buf)?;
        Ok(self.recv(data)?)
    }

    fn transfer_bits(&mut self, value: u8, nbits: u8) -> CoreResult<u8> {
        check_bit_count(nbits)?;
        self.send(&encode_bits(value, nbits))?;
        Ok(self.recv_byte()? & bit_mask(nbits))
    }

    fn set_clock_rate(&mut self, slow: bool) -> CoreResult<()> {
        Ok(self.send(&encode_clock(slow))?)
    }

    fn send_trailer_bits(&mut self, nbits: u32) -> CoreResult<()> {
        let mut buf = Vec::with_capacity(5);
        encode_trailer(&mut buf, nbits);
        Ok(self.send(&buf)?)
    }

    fn close(&mut self) -> CoreResult<()> {
        Ok(self.shutdown()?)
    }

    fn fail(&mut self, code: i32) -> ! {
        self.drain();
        if let Err(e) = self.shutdown() {
            log::warn!("Failed to restore FTDI state on close: {}", e);
        }
        log::error!("ABORT.");
        std::process::exit(code)
    }
}

/// Parse programmer options from a list of key-value pairs
///
/// Format: "dev=i:<vid>:<pid>,port=<A|B|C|D>"
pub fn parse_options(options: &[(&str, &str)]) -> Result<FtdiConfig> {
    let mut config = FtdiConfig::default();

    for (key, value) in options {
        match *key {
            "dev" => {
                config.device = Some(value.parse()?);
            }
            "port" | "channel" => {
                let mut chars = value.chars();
                let interface = match (chars.next(), chars.next()) {
                    (Some(c), None) => FtdiInterface::from_char(c),
                    _ => None,
                };
                config.interface = interface.ok_or_else(|| {
                    FtdiError::InvalidChannel(format!(
                        "Invalid channel '{}': must be A, B, C, or D",
                        value
                    ))
                })?;
            }
            _ => {
                log::warn!("Unknown FTDI option: {}={}", key, value);
            }
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_string() {
        let dev: DeviceString = "i:0x0403:0x6010".parse().unwrap();
        assert_eq!(dev.vendor_id, 0x0403);
        assert_eq!(dev.product_id, 0x6010);
        assert_eq!(dev.to_string(), "i:0x0403:0x6010");

        let dev: DeviceString = "i:1027:24592".parse().unwrap();
        assert_eq!(dev, DeviceString { vendor_id: 0x0403, product_id: 0x6010 });

        assert!("d:001/004".parse::<DeviceString>().is_err());
        assert!("i:0x0403".parse::<DeviceString>().is_err());
        assert!("i:0x0403:0x6010:0".parse::<DeviceString>().is_err());
        assert!("i:0x0403:0xZZZZ".parse::<DeviceString>().is_err());
    }

    #[test]
    fn test_default_candidates() {
        let config = FtdiConfig::default();
        assert_eq!(config.candidates(), vec![(0x0403, 0x6010), (0x0403, 0x6014)]);
        assert_eq!(config.interface, FtdiInterface::A);
    }

    #[test]
    fn test_parse_options() {
        let config = parse_options(&[("dev", "i:0x0403:0x6014"), ("port", "b")]).unwrap();
        assert_eq!(config.candidates(), vec![(0x0403, 0x6014)]);
        assert_eq!(config.interface, FtdiInterface::B);

        assert!(matches!(
            parse_options(&[("port", "E")]),
            Err(FtdiError::InvalidChannel(_))
        ));
        assert!(matches!(
            parse_options(&[("port", "AB")]),
            Err(FtdiError::InvalidChannel(_))
        ));
        assert!(matches!(
            parse_options(&[("dev", "garbage")]),
            Err(FtdiError::InvalidParameter(_))
        ));
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
        fail_latency: bool,
    }

    impl RestoreState for Recorder {
        fn restore_latency(&mut self, latency: u8) -> Result<()> {
            self.calls.push(format!("latency {}", latency));
            if self.fail_latency {
                return Err(FtdiError::ConfigFailed("latency".into()));
            }
            Ok(())
        }

        fn reset_bitmode(&mut self) -> Result<()> {
            self.calls.push("bitmode reset".into());
            Ok(())
        }
    }

    #[test]
    fn test_restore_puts_back_latency_and_bitmode() {
        let mut device = Recorder::default();
        restore(&mut device, 16).unwrap();
        assert_eq!(device.calls, vec!["latency 16", "bitmode reset"]);
    }

    #[test]
    fn test_restore_resets_bitmode_when_latency_fails() {
        let mut device = Recorder {
            fail_latency: true,
            ..Default::default()
        };
        assert!(matches!(
            restore(&mut device, 16),
            Err(FtdiError::ConfigFailed(_))
        ));
        assert_eq!(device.calls, vec!["latency 16", "bitmode reset"]);
    }

    #[test]
    fn test_closed_transport_skips_restore() {
        let mut ftdi = Ftdi {
            device: None,
            saved_latency: 16,
        };
        ftdi.shutdown().unwrap();
        assert!(matches!(ftdi.write_only(&[0x00]), Err(_)));
    }
}
