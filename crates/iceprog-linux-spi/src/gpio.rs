//! Control lines over the GPIO character device
//!
//! The reset and chip-select lines are outputs, the configuration-done line
//! is an input. All three are requested once at open and held until close.

use gpiocdev::line::{Offset, Value};
use gpiocdev::request::{Config, Request};

use crate::error::{LinuxSpiError, Result};

/// Default GPIO chip
pub const DEFAULT_CHIP: &str = "/dev/gpiochip0";

/// GPIO line offsets of the three control signals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpioLines {
    /// CRESET_B output
    pub reset: Offset,
    /// Flash chip-select output
    pub select: Offset,
    /// CDONE input
    pub done: Offset,
}

impl Default for GpioLines {
    fn default() -> Self {
        Self {
            reset: 17,
            select: 8,
            done: 22,
        }
    }
}

/// Wire level for an active-low line
pub fn line_level(asserted: bool) -> Value {
    if asserted {
        Value::Inactive
    } else {
        Value::Active
    }
}

/// Requested control lines
pub struct ControlLines {
    request: Request,
    lines: GpioLines,
}

impl ControlLines {
    /// Request the lines on `chip`
    ///
    /// Both outputs start high (deasserted).
    pub fn request(chip: &str, lines: GpioLines) -> Result<Self> {
        let mut config = Config::default();
        config.with_line(lines.reset).as_output(line_level(false));
        config.with_line(lines.select).as_output(line_level(false));
        config.with_line(lines.done).as_input();

        let request = Request::from_config(config)
            .on_chip(chip)
            .with_consumer("iceprog")
            .request()
            .map_err(|source| LinuxSpiError::LineRequestFailed {
                chip: chip.to_string(),
                source,
            })?;

        log::debug!(
            "linux_spi: GPIO {} reset={} select={} done={}",
            chip,
            lines.reset,
            lines.select,
            lines.done
        );

        Ok(Self { request, lines })
    }

    /// Drive chip-select and reset
    pub fn set(&mut self, select: bool, reset: bool) -> Result<()> {
        self.request
            .set_value(self.lines.select, line_level(select))
            .map_err(LinuxSpiError::SetValueFailed)?;
        self.request
            .set_value(self.lines.reset, line_level(reset))
            .map_err(LinuxSpiError::SetValueFailed)?;
        Ok(())
    }

    /// Sample CDONE
    pub fn done(&mut self) -> Result<bool> {
        let value = self
            .request
            .value(self.lines.done)
            .map_err(LinuxSpiError::GetValueFailed)?;
        Ok(value == Value::Active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_level_is_active_low() {
        assert_eq!(line_level(true), Value::Inactive);
        assert_eq!(line_level(false), Value::Active);
    }

    #[test]
    fn test_default_lines() {
        let lines = GpioLines::default();
        assert_eq!((lines.reset, lines.select, lines.done), (17, 8, 22));
    }
}
