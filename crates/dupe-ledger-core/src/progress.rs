use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::scanner::ScanSummary;

/// Trait for reporting scan progress.
///
/// The CLI implements it with indicatif; tests use [`SilentReporter`].
/// All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_scan_start(&self, _roots: &[String]) {}
    fn on_file_recorded(&self, _files_recorded: usize, _path: &str) {}
    fn on_file_failed(&self, _path: &Path, _reason: &str) {}
    fn on_vanished_start(&self) {}
    fn on_scan_complete(&self, _summary: &ScanSummary) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}

/// Shared flag used to request a graceful stop of a running scan.
///
/// Workers check it between files, so a file being hashed is finished (or
/// dropped) before the scan winds down.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
