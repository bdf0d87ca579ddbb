//! Programmer registration and dispatch
//!
//! This module provides a centralized registry for all programmer backends,
//! with support for feature-gated inclusion and dynamic help text generation.

use iceprog_core::{Error, Result, Transport};

/// Information about a programmer
pub struct ProgrammerInfo {
    /// Primary name (used for matching)
    pub name: &'static str,
    /// Alternative names/aliases
    pub aliases: &'static [&'static str],
    /// Short description
    pub description: &'static str,
}

impl ProgrammerInfo {
    fn matches(&self, name: &str) -> bool {
        self.name == name || self.aliases.contains(&name)
    }
}

/// Get information about all available programmers (enabled at compile time)
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_programmers() -> Vec<ProgrammerInfo> {
    let mut programmers = Vec::new();

    #[cfg(feature = "ftdi")]
    programmers.push(ProgrammerInfo {
        name: "ftdi",
        aliases: &["ft2232", "ft232h"],
        description: "FTDI MPSSE board (iCEstick, iCE40 breakout) (dev=i:<vid>:<pid>,port=<A-D>)",
    });

    #[cfg(feature = "linux-spi")]
    programmers.push(ProgrammerInfo {
        name: "linux_spi",
        aliases: &["linux-spi", "spidev"],
        description: "Linux spidev plus GPIO lines (dev=/dev/spidevX.Y,gpiochip=<n>,reset=<line>,select=<line>,done=<line>,mode=<0-3>)",
    });

    #[cfg(feature = "dummy")]
    programmers.push(ProgrammerInfo {
        name: "dummy",
        aliases: &[],
        description: "In-memory board emulator for testing (size=<bytes>,busy=<polls>)",
    });

    programmers
}

/// Generate help text listing all available programmers
pub fn programmer_help() -> String {
    let programmers = available_programmers();

    if programmers.is_empty() {
        return "No programmers available (recompile with programmer features enabled)".to_string();
    }

    let mut help = String::from("Available programmers:\n");
    for p in &programmers {
        help.push_str(&format!("  {:12} - {}\n", p.name, p.description));
    }
    help
}

/// Generate a short list of programmer names for CLI help
pub fn programmer_names_short() -> String {
    let programmers = available_programmers();
    let names: Vec<&str> = programmers.iter().map(|p| p.name).collect();
    names.join(", ")
}

/// Resolve a programmer name or alias to its primary name
pub fn find_programmer(name: &str) -> Option<&'static str> {
    available_programmers()
        .into_iter()
        .find(|p| p.matches(name))
        .map(|p| p.name)
}

/// Parse a programmer string into name and options
///
/// Format: `name` or `name:key=value,key=value`
pub fn parse_programmer_string(s: &str) -> (&str, Vec<(&str, &str)>) {
    if let Some((name, opts)) = s.split_once(':') {
        let options: Vec<_> = opts
            .split(',')
            .filter_map(|opt| opt.split_once('='))
            .collect();
        (name, options)
    } else {
        (s, Vec::new())
    }
}

fn unknown_programmer_error(name: &str) -> Error {
    let mut msg = format!("Unknown programmer: {}\n\n", name);
    msg.push_str(&programmer_help());
    Error::Configuration(msg)
}

/// Open the programmer named by `programmer`
///
/// The programmer string can be just the name (e.g. "ftdi") or include
/// parameters (e.g. "ftdi:port=B").
#[allow(unused_variables)]
pub fn open_programmer(programmer: &str) -> Result<Box<dyn Transport>> {
    let (name, options) = parse_programmer_string(programmer);

    let canonical_name = find_programmer(name).ok_or_else(|| unknown_programmer_error(name))?;

    match canonical_name {
        #[cfg(feature = "ftdi")]
        "ftdi" => {
            use iceprog_ftdi::{parse_options, Ftdi};

            let config = parse_options(&options)?;
            log::debug!("Opening FTDI programmer...");
            let device = Ftdi::open(&config).inspect_err(|_| {
                log::error!("Make sure the device is connected and you have permissions.")
            })?;
            Ok(Box::new(device))
        }

        #[cfg(feature = "linux-spi")]
        "linux_spi" => {
            use iceprog_linux_spi::{parse_options, LinuxSpi};

            let config = parse_options(&options)?;
            log::debug!("Opening Linux SPI programmer on {}...", config.device);
            Ok(Box::new(LinuxSpi::open(&config)?))
        }

        #[cfg(feature = "dummy")]
        "dummy" => {
            let config = iceprog_dummy::parse_options(&options)
                .map_err(|e| Error::Configuration(format!("Invalid dummy parameters: {}", e)))?;
            Ok(Box::new(iceprog_dummy::DummyTransport::new(config)))
        }

        _ => Err(unknown_programmer_error(name)),
    }
}
