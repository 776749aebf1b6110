use clap::{Parser, Subcommand, ValueEnum};
use dupe_ledger_core::analysis::ComparisonScope;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "dupe-ledger")]
#[command(about = "Find duplicate files and near-duplicate directories across backup archives", long_about = None)]
pub struct Cli {
    /// Catalog database (overrides `catalog_path` from the configuration)
    #[arg(long, global = true)]
    pub catalog: Option<PathBuf>,

    /// Output format for reports
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Walk the roots and record an observation for every file
    Scan {
        /// Directories to scan (defaults to `root_paths` from the configuration)
        roots: Vec<PathBuf>,
        /// Re-hash every file even when size and mtime are unchanged
        #[arg(long)]
        verify: bool,
        /// Hash the targets of symbolic links instead of skipping them
        #[arg(long)]
        follow_symlinks: bool,
        /// Number of fingerprint worker threads
        #[arg(long)]
        workers: Option<usize>,
        /// Do not record files that disappeared since the last scan
        #[arg(long)]
        keep_vanished: bool,
    },
    /// List groups of current files with identical content
    Duplicates {
        /// Only consider files below this directory
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// List directory pairs whose file overlap reaches the threshold
    Similar {
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long, value_enum)]
        scope: Option<ScopeArg>,
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Show every recorded event for one path
    History { path: PathBuf },
    /// List scan sessions, newest first
    Sessions,
    /// Print catalog totals
    Stats,
    /// Print configuration values
    PrintConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Csv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScopeArg {
    All,
    Siblings,
    SameName,
}

impl From<ScopeArg> for ComparisonScope {
    fn from(scope: ScopeArg) -> Self {
        match scope {
            ScopeArg::All => ComparisonScope::All,
            ScopeArg::Siblings => ComparisonScope::Siblings,
            ScopeArg::SameName => ComparisonScope::SameName,
        }
    }
}
