use colored::*;
use dupe_ledger_core::{ProgressReporter, ScanSummary};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// CLI progress reporter using an indicatif spinner.
///
/// The number of files is unknown until the walk ends, so the scan shows a
/// running count instead of a bar.
pub struct CliReporter {
    bar: ProgressBar,
    failures: AtomicUsize,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: ProgressBar::hidden(),
            failures: AtomicUsize::new(0),
        }
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
    }
}

impl ProgressReporter for CliReporter {
    fn on_scan_start(&self, roots: &[String]) {
        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        self.bar.set_style(Self::spinner_style());
        self.bar
            .set_message(format!("Scanning {} root(s)...", roots.len()));
        self.bar.enable_steady_tick(Duration::from_millis(80));
    }

    fn on_file_recorded(&self, files_recorded: usize, _path: &str) {
        let failures = self.failures.load(Ordering::Relaxed);
        if failures == 0 {
            self.bar
                .set_message(format!("Scanning... {} files recorded", files_recorded));
        } else {
            self.bar.set_message(format!(
                "Scanning... {} files recorded, {} skipped",
                files_recorded, failures
            ));
        }
    }

    fn on_file_failed(&self, _path: &Path, _reason: &str) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    fn on_vanished_start(&self) {
        self.bar.set_message("Checking for vanished files...");
    }

    fn on_scan_complete(&self, summary: &ScanSummary) {
        self.bar.finish_and_clear();
        eprintln!(
            "  {} Scan complete: {} files in {:.2}s",
            "✓".green(),
            summary.files_recorded,
            summary.duration_secs
        );
    }
}

impl Drop for CliReporter {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}
