//! CLI command implementation
//!
//! Files are opened and the whole input is buffered before any programmer
//! is touched, so a bad path never leaves a board half reset. The run
//! itself is handed to [`iceprog_core::workflow::run`].

mod progress;

pub use progress::IndicatifProgress;

use crate::cli::{FileRole, Invocation};
use iceprog_core::workflow::{self, DataStream, Operation, Report};
use iceprog_core::{Result, Transport};
use std::fs::File;
use std::io::{self, BufWriter, Cursor, Read, Write};
use std::path::Path;

/// Files attached to a run
pub struct Job {
    input: Option<Cursor<Vec<u8>>>,
    output: Option<Box<dyn Write>>,
}

fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == "-"
}

fn annotate(e: io::Error, action: &str, path: &Path) -> io::Error {
    io::Error::new(
        e.kind(),
        format!("can't open '{}' for {}: {}", path.display(), action, e),
    )
}

/// Read the whole input, `-` for stdin
fn load_input(path: &Path) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    if is_stdio(path) {
        io::stdin().lock().read_to_end(&mut data)?;
    } else {
        File::open(path)
            .map_err(|e| annotate(e, "reading", path))?
            .read_to_end(&mut data)?;
    }
    log::debug!("Read {} bytes from {}", data.len(), path.display());
    Ok(data)
}

/// Create the output, `-` for stdout
fn create_output(path: &Path) -> Result<Box<dyn Write>> {
    if is_stdio(path) {
        return Ok(Box::new(io::stdout()));
    }
    let file = File::create(path).map_err(|e| annotate(e, "writing", path))?;
    Ok(Box::new(BufWriter::new(file)))
}

impl Job {
    /// Open the files named by `file`
    pub fn prepare(file: &FileRole) -> Result<Self> {
        let mut job = Job {
            input: None,
            output: None,
        };
        match file {
            FileRole::None => {}
            FileRole::EmptyInput => job.input = Some(Cursor::new(Vec::new())),
            FileRole::Input(path) => job.input = Some(Cursor::new(load_input(path)?)),
            FileRole::Output(path) => job.output = Some(create_output(path)?),
        }
        Ok(job)
    }

    fn stream(&mut self) -> DataStream<'_> {
        if let Some(input) = self.input.as_mut() {
            DataStream::Input(input)
        } else if let Some(output) = self.output.as_mut() {
            DataStream::Output(output)
        } else {
            DataStream::None
        }
    }

    /// Run `invocation` on `transport`
    pub fn execute<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        invocation: &Invocation,
    ) -> Result<Report> {
        let mut progress = if invocation.progress {
            IndicatifProgress::new()
        } else {
            IndicatifProgress::hidden()
        };
        let report = workflow::run(
            transport,
            &invocation.options,
            &invocation.operation,
            self.stream(),
            &mut progress,
        )?;
        if let Some(output) = self.output.as_mut() {
            output.flush()?;
        }
        print_report(&report, &invocation.operation);
        Ok(report)
    }
}

/// Summarize a finished run
pub fn print_report(report: &Report, operation: &Operation) {
    match operation {
        Operation::Program(_) | Operation::EraseOnly { .. } => {
            if report.bulk_erased {
                log::info!("Erased whole chip");
            } else if !report.erased.is_empty() {
                log::info!(
                    "Erased {} sector(s) 0x{:06X}..0x{:06X}",
                    report.erased.len(),
                    report.erased[0].begin,
                    report.erased[report.erased.len() - 1].end
                );
            }
            if report.pages_programmed > 0 {
                log::info!(
                    "Programmed {} bytes in {} page(s), {} bytes verified",
                    report.bytes_programmed,
                    report.pages_programmed,
                    report.bytes_verified
                );
            }
        }
        Operation::Verify => log::info!("Verified {} bytes", report.bytes_verified),
        Operation::Read { .. } => log::info!("Read {} bytes", report.bytes_read),
        Operation::Identify => {}
        Operation::Sram => {
            log::info!("Loaded {} bytes into configuration SRAM", report.bytes_streamed)
        }
    }
    if report.ready == Some(false) {
        log::warn!("CDONE is low, the FPGA did not report a successful configuration");
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;
    use iceprog_dummy::DummyTransport;
    use std::path::PathBuf;

    fn invocation(args: &[&str]) -> Invocation {
        let mut argv = vec!["iceprog"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap().invocation().unwrap()
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("iceprog-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_program_and_read_back_through_files() {
        let input = temp_path("input.bin");
        let output = temp_path("output.bin");
        let payload: Vec<u8> = (0..600u32).map(|i| (i * 7) as u8).collect();
        std::fs::write(&input, &payload).unwrap();

        let mut board = DummyTransport::new_default();

        let inv = invocation(&["-o", "0x1000", input.to_str().unwrap()]);
        let mut job = Job::prepare(&inv.file).unwrap();
        let report = job.execute(&mut board, &inv).unwrap();
        assert_eq!(report.bytes_programmed, 600);
        assert_eq!(report.bytes_verified, 600);

        let inv = invocation(&["-R", "600", "-o", "0x1000", output.to_str().unwrap()]);
        let mut job = Job::prepare(&inv.file).unwrap();
        let report = job.execute(&mut board, &inv).unwrap();
        assert_eq!(report.bytes_read, 600);
        drop(job);
        assert_eq!(std::fs::read(&output).unwrap(), payload);

        std::fs::remove_file(&input).unwrap();
        std::fs::remove_file(&output).unwrap();
    }

    #[test]
    fn test_missing_input_file() {
        let inv = invocation(&[temp_path("does-not-exist").to_str().unwrap()]);
        let err = Job::prepare(&inv.file).err().unwrap();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_bulk_erase_without_file() {
        let mut board = DummyTransport::new_default();
        board.data_mut()[0x20000] = 0x00;

        let inv = invocation(&["-b"]);
        let mut job = Job::prepare(&inv.file).unwrap();
        let report = job.execute(&mut board, &inv).unwrap();
        assert!(report.bulk_erased);
        assert_eq!(report.pages_programmed, 0);
        assert_eq!(board.data()[0x20000], 0xFF);
    }

    #[test]
    fn test_identify_needs_no_file() {
        let mut board = DummyTransport::new_default();
        let inv = invocation(&["-t"]);
        let mut job = Job::prepare(&inv.file).unwrap();
        let report = job.execute(&mut board, &inv).unwrap();
        assert_eq!(report.jedec_id.unwrap().to_string(), "0xEF 0x40 0x18 0x00");
    }
}
