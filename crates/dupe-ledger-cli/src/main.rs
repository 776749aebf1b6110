mod commands;
mod logging;
mod progress;
mod report;

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands, OutputFormat};
use dotenv::dotenv;
use dupe_ledger_core::analysis::{find_duplicates, find_similar_directories, DuplicateReport, SimilarityOptions};
use dupe_ledger_core::paths::{normalize_path, path_to_string};
use dupe_ledger_core::{AppConfig, CancelToken, Catalog, Scanner};
use progress::CliReporter;
use report::Report;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    dotenv().ok();

    let _guard = logging::init_logger();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config =
        dupe_ledger_core::config::load_configuration().context("Error loading configuration")?;
    if let Some(catalog) = &cli.catalog {
        config.catalog_path = path_to_string(catalog);
    }

    let format = cli.format;
    match cli.command {
        Some(Commands::Scan {
            roots,
            verify,
            follow_symlinks,
            workers,
            keep_vanished,
        }) => {
            if !roots.is_empty() {
                config.root_paths = roots.iter().map(|r| path_to_string(r)).collect();
            }
            if verify {
                config.scan.trust_mtime = false;
            }
            if follow_symlinks {
                config.scan.follow_symlinks = true;
            }
            if let Some(workers) = workers {
                config.scan.workers = workers;
            }
            if keep_vanished {
                config.scan.record_vanished = false;
            }
            run_scan(config, format)
        }
        Some(Commands::Duplicates { root }) => run_duplicates(&config, root.as_deref(), format),
        Some(Commands::Similar {
            threshold,
            scope,
            root,
        }) => {
            let options = SimilarityOptions {
                threshold: threshold.unwrap_or(config.similarity.threshold),
                scope: scope.map(Into::into).unwrap_or(config.similarity.scope),
                root,
                max_key_fanout: config.similarity.max_key_fanout,
            };
            run_similar(&config, &options, format)
        }
        Some(Commands::History { path }) => run_history(&config, &path, format),
        Some(Commands::Sessions) => {
            let catalog = open_catalog(&config)?;
            let mut report = Report::new(format);
            report.sessions(&catalog.list_sessions()?)?;
            report.finish()
        }
        Some(Commands::Stats) => {
            let catalog = open_catalog(&config)?;
            let mut report = Report::new(format);
            report.stats(&catalog.stats()?)?;
            report.finish()
        }
        Some(Commands::PrintConfig) => {
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
                OutputFormat::Text | OutputFormat::Csv => println!("Configuration: {:#?}", config),
            }
            Ok(())
        }
        None => {
            Cli::command().print_long_help()?;
            Ok(())
        }
    }
}

fn open_catalog(config: &AppConfig) -> Result<Catalog> {
    Catalog::open(&config.catalog_path)
        .with_context(|| format!("Cannot open catalog {}", config.catalog_path))
}

fn run_scan(config: AppConfig, format: OutputFormat) -> Result<()> {
    config.validate()?;
    let catalog = open_catalog(&config)?;

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        if handler_token.is_cancelled() {
            std::process::exit(130);
        }
        eprintln!("{}", "Interrupt received, finishing current files...".yellow());
        handler_token.cancel();
    })
    .context("Cannot install Ctrl-C handler")?;

    let summary = {
        let reporter = CliReporter::new();
        Scanner::new(config)
            .with_cancel_token(cancel)
            .scan(&catalog, &reporter)?
    };

    if summary.warning_count() > 0 {
        warn!("{} files were skipped", summary.warning_count());
    }

    let mut report = Report::new(format);
    report.scan_summary(&summary)?;
    report.finish()?;

    catalog.close().context("Error closing catalog")?;
    Ok(())
}

fn run_duplicates(config: &AppConfig, root: Option<&Path>, format: OutputFormat) -> Result<()> {
    let catalog = open_catalog(config)?;
    let mut report = Report::new(format);
    let mut totals = DuplicateReport::default();

    for group in find_duplicates(&catalog, root)? {
        let group = group?;
        totals.add(&group);
        report.duplicate_group(&group)?;
    }

    report.duplicate_totals(&totals)?;
    report.finish()?;
    info!(
        "{} duplicate groups, {} files",
        totals.groups, totals.files
    );
    Ok(())
}

fn run_similar(config: &AppConfig, options: &SimilarityOptions, format: OutputFormat) -> Result<()> {
    let catalog = open_catalog(config)?;
    let pairs = find_similar_directories(&catalog, options)?;

    let mut report = Report::new(format);
    report.similar_pairs(&pairs)?;
    report.finish()
}

fn run_history(config: &AppConfig, path: &Path, format: OutputFormat) -> Result<()> {
    let catalog = open_catalog(config)?;
    let path = path_to_string(&normalize_path(path)?);
    let events = catalog.history(&path)?;

    let mut report = Report::new(format);
    report.history(&path, &events)?;
    report.finish()
}
