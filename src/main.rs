//! iceprog - Simple programming tool for iCE40 FPGA boards
//!
//! Writes bitstreams to the SPI configuration flash of an iCE40 board, reads
//! or verifies the flash, or loads a bitstream straight into the FPGA's
//! configuration SRAM.
//!
//! # Architecture
//!
//! All flash and FPGA sequencing lives in `iceprog-core` and talks to the
//! board through the `Transport` trait. Backends implement that trait:
//! - **ftdi**: FT2232H/FT232H MPSSE boards such as the iCEstick
//! - **linux_spi**: a Linux spidev device plus three GPIO lines
//! - **dummy**: an in-memory board used for testing
//!
//! Exit status: 0 on success, 1 on usage or file errors, 2 on hardware or
//! communication errors, 3 on a verify mismatch.

mod cli;
mod commands;
mod programmers;

use clap::error::ErrorKind;
use clap::Parser;
use cli::Cli;
use commands::Job;
use iceprog_core::Transport;
use std::process::exit;

/// Exit status for usage and file errors
const EXIT_USAGE: i32 = 1;

/// Log level selected by the number of `-v` flags
fn log_level(verbose: u8) -> log::LevelFilter {
    match verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}

/// Logger writing to stderr; `RUST_LOG` overrides the verbosity default
fn logger(verbose: u8) -> env_logger::Builder {
    let default = log_level(verbose).to_string().to_lowercase();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => EXIT_USAGE,
            };
            let _ = e.print();
            exit(code);
        }
    };

    logger(cli.verbose).init();

    let invocation = match cli.invocation() {
        Ok(invocation) => invocation,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("Try 'iceprog --help' for more information.");
            exit(EXIT_USAGE);
        }
    };

    let mut job = match Job::prepare(&invocation.file) {
        Ok(job) => job,
        Err(e) => {
            log::error!("{}", e);
            exit(e.exit_code());
        }
    };

    let mut transport = match programmers::open_programmer(&cli.programmer) {
        Ok(transport) => transport,
        Err(e) => {
            log::error!("{}", e);
            exit(e.exit_code());
        }
    };

    if let Err(e) = job.execute(&mut transport, &invocation) {
        log::error!("{}", e);
        transport.fail(e.exit_code());
    }

    if let Err(e) = transport.close() {
        log::error!("{}", e);
        exit(e.exit_code());
    }
    log::info!("Bye.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::{LevelFilter, Log, Metadata};

    #[test]
    fn test_verbose_raises_log_level() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        assert_eq!(logger(0).build().filter(), LevelFilter::Info);
        assert_eq!(logger(1).build().filter(), LevelFilter::Debug);
        assert_eq!(logger(2).build().filter(), LevelFilter::Trace);
        assert_eq!(logger(5).build().filter(), LevelFilter::Trace);

        let debug = Metadata::builder()
            .level(log::Level::Debug)
            .target("iceprog_core::workflow")
            .build();
        assert!(!logger(0).build().enabled(&debug));
        assert!(logger(1).build().enabled(&debug));
    }
}
