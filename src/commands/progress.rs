//! Progress reporting with indicatif

use iceprog_core::workflow::Progress;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

/// Create a progress bar with custom phase message
fn create_progress_bar_with_phase(
    total: u64,
    phase: &str,
) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{bytes}}/{{total_bytes}} ({{bytes_per_sec}}, {{eta}}) {}",
                phase
            ))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Create a standard spinner style
fn create_spinner_style() -> Result<ProgressStyle, Box<dyn std::error::Error>> {
    Ok(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?)
}

/// Progress reporter using indicatif progress bars
///
/// Bars are drawn on stderr so that a flash dump written to stdout stays
/// clean.
pub struct IndicatifProgress {
    multi: MultiProgress,
    current_bar: Option<ProgressBar>,
    phase: &'static str,
    sectors: usize,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            current_bar: None,
            phase: "",
            sectors: 0,
        }
    }

    /// A reporter that draws nothing, used when log output is verbose
    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::hidden()),
            ..Self::new()
        }
    }

    fn create_bar(&mut self, total: u64, phase: &'static str) {
        self.phase = phase;
        let pb = self.multi.add(
            create_progress_bar_with_phase(total, phase)
                .unwrap_or_else(|_| ProgressBar::new(total)),
        );
        self.current_bar = Some(pb);
    }

    fn create_spinner(&mut self, message: String, phase: &'static str) {
        self.phase = phase;
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(create_spinner_style().unwrap_or_else(|_| ProgressStyle::default_spinner()));
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(100));
        self.current_bar = Some(pb);
    }

    fn set_position(&self, pos: usize) {
        if let Some(pb) = &self.current_bar {
            pb.set_position(pos as u64);
        }
    }
}

impl Default for IndicatifProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl Progress for IndicatifProgress {
    fn erasing(&mut self, sectors: usize, bytes: usize) {
        self.sectors = sectors;
        let message = if bytes == 0 {
            "Erasing chip...".to_string()
        } else {
            format!("Erasing {} sectors ({} bytes)...", sectors, bytes)
        };
        self.create_spinner(message, "Erase");
    }

    fn erase_progress(&mut self, sectors_erased: usize) {
        if let Some(pb) = &self.current_bar {
            pb.set_message(format!("Erased {}/{} sectors...", sectors_erased, self.sectors));
        }
    }

    fn programming(&mut self, total_bytes: usize) {
        self.create_bar(total_bytes as u64, "Programming");
    }

    fn program_progress(&mut self, bytes_written: usize) {
        self.set_position(bytes_written);
    }

    fn reading(&mut self, total_bytes: usize) {
        self.create_bar(total_bytes as u64, "Reading");
    }

    fn read_progress(&mut self, bytes_read: usize) {
        self.set_position(bytes_read);
    }

    fn finish(&mut self) {
        if let Some(pb) = self.current_bar.take() {
            pb.finish_with_message(format!("{} complete", self.phase));
        }
    }
}
