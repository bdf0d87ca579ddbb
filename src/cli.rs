//! CLI argument parsing

use crate::programmers;
use clap::Parser;
use iceprog_core::plan;
use iceprog_core::protocol::WaitPolicy;
use iceprog_core::workflow::{EraseMode, FlashOptions, Operation, WriteOptions, DEFAULT_READ_SIZE};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Parse a size or offset: decimal, `0x` hex, with an optional `k` or `M` suffix
pub fn parse_size(s: &str) -> Result<u32, String> {
    plan::parse_size(s).ok_or_else(|| format!("`{}' is not a valid size", s))
}

/// Generate dynamic help text for the programmer argument
fn programmer_help() -> String {
    format!(
        "Programmer to use [available: {}]",
        programmers::programmer_names_short()
    )
}

#[derive(Parser, Debug)]
#[command(name = "iceprog")]
#[command(
    author,
    version,
    about = "Simple programming tool for iCE40 FPGA boards",
    long_about = "Simple programming tool for iCE40 FPGA boards.\n\n\
                  Without a mode option the input file is written to the configuration \
                  flash: the covered 64 KiB sectors are erased, the data is programmed and \
                  read back for verification. Exit status is 0 on success, 1 on usage or \
                  file errors, 2 on hardware or communication errors and 3 when the flash \
                  contents do not match the input."
)]
pub struct Cli {
    /// Programmer and its options, e.g. `ftdi:port=B` or `linux_spi:dev=/dev/spidev0.0`
    #[arg(short, long, default_value = "ftdi", help = programmer_help())]
    pub programmer: String,

    /// Start address for read/write/erase (decimal, 0x hex, k or M suffix)
    #[arg(short, long, value_name = "SIZE", value_parser = parse_size)]
    pub offset: Option<u32>,

    /// Use slow SPI clock (50 kHz instead of 6 MHz)
    #[arg(short, long)]
    pub slow: bool,

    /// Verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Read first 256 KiB from flash and write to FILE
    #[arg(short, long)]
    pub read: bool,

    /// Read SIZE bytes from flash and write to FILE
    #[arg(short = 'R', long, value_name = "SIZE", value_parser = parse_size)]
    pub read_size: Option<u32>,

    /// Erase the sectors that writing SIZE bytes would cover, without programming
    #[arg(short, long, value_name = "SIZE", value_parser = parse_size)]
    pub erase: Option<u32>,

    /// Do not write flash, only verify (`check')
    #[arg(short, long)]
    pub check: bool,

    /// Write FILE into the FPGA's configuration SRAM (no flash access)
    #[arg(short = 'S', long)]
    pub sram: bool,

    /// Just read the flash ID sequence
    #[arg(short, long)]
    pub test: bool,

    /// Bulk erase entire flash before writing
    #[arg(short, long)]
    pub bulk_erase: bool,

    /// Do not erase flash before writing
    #[arg(short, long)]
    pub no_erase: bool,

    /// Disable write protection before erasing or writing
    #[arg(short, long)]
    pub unprotect: bool,

    /// Give up when the flash stays busy for longer than MS milliseconds
    #[arg(long, value_name = "MS")]
    pub wait_timeout: Option<u64>,

    /// Input or output file, `-' for stdin/stdout
    pub file: Option<PathBuf>,
}

/// A combination of options that does not make sense
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UsageError {
    #[error("options `-r'/`-R', `-e', `-c', `-S' and `-t' are mutually exclusive")]
    ExclusiveModes,
    #[error("options `-b' and `-n' are mutually exclusive")]
    BulkAndNoErase,
    #[error("option `-{0}' only valid in programming mode")]
    ProgramOnly(char),
    #[error("option `-o' not supported in {0} mode")]
    OffsetNotSupported(&'static str),
    #[error("test mode doesn't take a file name")]
    UnexpectedFile,
    #[error("missing argument")]
    MissingFile,
}

/// Where the data of a run comes from or goes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRole {
    /// No file is used
    None,
    /// Bytes are read from this file (`-` for stdin)
    Input(PathBuf),
    /// Program mode without a file: an empty input
    EmptyInput,
    /// Bytes are written to this file (`-` for stdout)
    Output(PathBuf),
}

/// A validated command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// What to do
    pub operation: Operation,
    /// Offset, clock and wait settings
    pub options: FlashOptions,
    /// File handling
    pub file: FileRole,
    /// Draw progress bars
    pub progress: bool,
}

impl Cli {
    fn read_mode(&self) -> bool {
        self.read || self.read_size.is_some()
    }

    /// Check option combinations and build the run description
    pub fn invocation(&self) -> Result<Invocation, UsageError> {
        let read_mode = self.read_mode();
        let erase_mode = self.erase.is_some();
        let modes = [read_mode, erase_mode, self.check, self.sram, self.test];
        if modes.iter().filter(|&&m| m).count() > 1 {
            return Err(UsageError::ExclusiveModes);
        }
        if self.bulk_erase && self.no_erase {
            return Err(UsageError::BulkAndNoErase);
        }

        let no_write = read_mode || self.check || self.sram || self.test;
        if self.unprotect && no_write {
            return Err(UsageError::ProgramOnly('u'));
        }
        if self.bulk_erase && no_write {
            return Err(UsageError::ProgramOnly('b'));
        }
        if self.no_erase && no_write {
            return Err(UsageError::ProgramOnly('n'));
        }

        let offset = self.offset.unwrap_or(0);
        if offset != 0 && self.sram {
            return Err(UsageError::OffsetNotSupported("SRAM"));
        }
        if offset != 0 && self.test {
            return Err(UsageError::OffsetNotSupported("test"));
        }

        let write = WriteOptions {
            erase: if self.bulk_erase {
                EraseMode::Bulk
            } else if self.no_erase {
                EraseMode::Skip
            } else {
                EraseMode::Sectors
            },
            disable_protection: self.unprotect,
        };

        let operation = if read_mode {
            Operation::Read {
                size: self.read_size.unwrap_or(DEFAULT_READ_SIZE),
            }
        } else if let Some(size) = self.erase {
            Operation::EraseOnly { size, write }
        } else if self.check {
            Operation::Verify
        } else if self.sram {
            Operation::Sram
        } else if self.test {
            Operation::Identify
        } else {
            Operation::Program(write)
        };

        let file = match (&self.file, &operation) {
            (Some(_), Operation::Identify) => return Err(UsageError::UnexpectedFile),
            (Some(path), op) if op.needs_output() => FileRole::Output(path.clone()),
            (Some(path), op) if op.needs_input() => FileRole::Input(path.clone()),
            (None, Operation::Program(_)) if self.bulk_erase || self.unprotect => {
                FileRole::EmptyInput
            }
            (None, op) if op.needs_input() || op.needs_output() => {
                return Err(UsageError::MissingFile)
            }
            _ => FileRole::None,
        };

        let wait = match self.wait_timeout {
            Some(ms) => WaitPolicy::with_timeout(Duration::from_millis(ms)),
            None => WaitPolicy::default(),
        };

        Ok(Invocation {
            operation,
            options: FlashOptions {
                offset,
                slow_clock: self.slow,
                wait,
            },
            file,
            progress: self.verbose == 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Invocation, UsageError> {
        let mut argv = vec!["iceprog"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap().invocation()
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("64k"), Ok(64 * 1024));
        assert_eq!(parse_size("0x10k"), Ok(16 * 1024));
        assert_eq!(parse_size("8K"), Err("`8K' is not a valid size".to_string()));
        assert!(parse_size("8192M").is_err());
    }

    #[test]
    fn test_default_program_mode() {
        let inv = parse(&["top.bin"]).unwrap();
        assert_eq!(inv.operation, Operation::Program(WriteOptions::default()));
        assert_eq!(inv.file, FileRole::Input(PathBuf::from("top.bin")));
        assert_eq!(inv.options.offset, 0);
        assert!(!inv.options.slow_clock);
        assert_eq!(inv.options.wait.timeout, None);
        assert!(inv.progress);
        assert!(!parse(&["-v", "top.bin"]).unwrap().progress);
    }

    #[test]
    fn test_program_options() {
        let inv = parse(&["-o", "128k", "-s", "-u", "-b", "--wait-timeout", "500", "top.bin"]).unwrap();
        assert_eq!(
            inv.operation,
            Operation::Program(WriteOptions {
                erase: EraseMode::Bulk,
                disable_protection: true
            })
        );
        assert_eq!(inv.options.offset, 0x20000);
        assert!(inv.options.slow_clock);
        assert_eq!(inv.options.wait.timeout, Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_read_modes() {
        let inv = parse(&["-r", "dump.bin"]).unwrap();
        assert_eq!(inv.operation, Operation::Read { size: 256 * 1024 });
        assert_eq!(inv.file, FileRole::Output(PathBuf::from("dump.bin")));

        let inv = parse(&["-R", "1M", "-o", "0x1000", "-"]).unwrap();
        assert_eq!(inv.operation, Operation::Read { size: 1024 * 1024 });
        assert_eq!(inv.options.offset, 0x1000);
        assert_eq!(inv.file, FileRole::Output(PathBuf::from("-")));
    }

    #[test]
    fn test_file_less_modes() {
        let inv = parse(&["-t"]).unwrap();
        assert_eq!(inv.operation, Operation::Identify);
        assert_eq!(inv.file, FileRole::None);

        let inv = parse(&["-e", "96k"]).unwrap();
        assert_eq!(
            inv.operation,
            Operation::EraseOnly {
                size: 96 * 1024,
                write: WriteOptions::default()
            }
        );
        assert_eq!(inv.file, FileRole::None);

        let inv = parse(&["-b"]).unwrap();
        assert_eq!(inv.file, FileRole::EmptyInput);
        let inv = parse(&["-u"]).unwrap();
        assert_eq!(inv.file, FileRole::EmptyInput);
    }

    #[test]
    fn test_exclusive_modes() {
        assert_eq!(parse(&["-r", "-c", "x"]), Err(UsageError::ExclusiveModes));
        assert_eq!(parse(&["-S", "-t"]), Err(UsageError::ExclusiveModes));
        assert_eq!(parse(&["-e", "1k", "-R", "1k", "x"]), Err(UsageError::ExclusiveModes));
        assert_eq!(parse(&["-b", "-n", "x"]), Err(UsageError::BulkAndNoErase));
    }

    #[test]
    fn test_program_only_options() {
        assert_eq!(parse(&["-c", "-u", "x"]), Err(UsageError::ProgramOnly('u')));
        assert_eq!(parse(&["-r", "-b", "x"]), Err(UsageError::ProgramOnly('b')));
        assert_eq!(parse(&["-S", "-n", "x"]), Err(UsageError::ProgramOnly('n')));
        // Erase-only mode accepts the erase options
        assert!(parse(&["-e", "1k", "-b"]).is_ok());
        assert!(parse(&["-e", "1k", "-u"]).is_ok());
    }

    #[test]
    fn test_offset_restrictions() {
        assert_eq!(
            parse(&["-S", "-o", "1k", "x"]),
            Err(UsageError::OffsetNotSupported("SRAM"))
        );
        assert_eq!(
            parse(&["-t", "-o", "1k"]),
            Err(UsageError::OffsetNotSupported("test"))
        );
        assert!(parse(&["-S", "-o", "0", "x"]).is_ok());
    }

    #[test]
    fn test_file_requirements() {
        assert_eq!(parse(&["-t", "x"]), Err(UsageError::UnexpectedFile));
        assert_eq!(parse(&[]), Err(UsageError::MissingFile));
        assert_eq!(parse(&["-c"]), Err(UsageError::MissingFile));
        assert_eq!(parse(&["-r"]), Err(UsageError::MissingFile));
        assert!(Cli::try_parse_from(["iceprog", "a", "b"]).is_err());
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
