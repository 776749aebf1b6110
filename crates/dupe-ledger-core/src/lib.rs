pub mod analysis;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod paths;
pub mod progress;
pub mod scanner;
pub mod storage;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use fingerprint::{Fingerprint, Fingerprinter};
pub use progress::{CancelToken, ProgressReporter, SilentReporter};
pub use scanner::{ScanFailure, ScanSummary, Scanner};
pub use storage::Catalog;
