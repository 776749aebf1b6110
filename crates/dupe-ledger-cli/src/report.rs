use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::*;
use serde::Serialize;
use std::io::{self, Write};

use dupe_ledger_core::analysis::{DuplicateGroup, DuplicateReport, SimilarityPair};
use dupe_ledger_core::storage::{CatalogStats, PathEvent, ScanSession};
use dupe_ledger_core::ScanSummary;

use crate::commands::OutputFormat;

/// Writes command results to stdout in the selected format. JSON output is
/// one object per line; CSV output gets a header row.
pub struct Report {
    format: OutputFormat,
    out: io::StdoutLock<'static>,
    csv: Option<csv::Writer<io::Stdout>>,
}

impl Report {
    pub fn new(format: OutputFormat) -> Self {
        let csv = (format == OutputFormat::Csv).then(|| csv::Writer::from_writer(io::stdout()));
        Self {
            format,
            out: io::stdout().lock(),
            csv,
        }
    }

    fn json<T: Serialize>(&mut self, value: &T) -> Result<()> {
        serde_json::to_writer(&mut self.out, value)?;
        writeln!(self.out)?;
        Ok(())
    }

    fn csv_row<T: Serialize>(&mut self, row: T) -> Result<()> {
        if let Some(writer) = self.csv.as_mut() {
            writer.serialize(row)?;
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        if let Some(mut writer) = self.csv.take() {
            writer.flush()?;
        }
        self.out.flush()?;
        Ok(())
    }

    // ── Scan ─────────────────────────────────────────────────────

    pub fn scan_summary(&mut self, summary: &ScanSummary) -> Result<()> {
        match self.format {
            OutputFormat::Json => self.json(summary),
            OutputFormat::Csv => {
                for failure in &summary.failures {
                    self.csv_row(FailureRow {
                        path: failure.path.to_string_lossy().into_owned(),
                        reason: &failure.reason,
                    })?;
                }
                Ok(())
            }
            OutputFormat::Text => {
                let out = &mut self.out;
                let status = if summary.interrupted {
                    "interrupted".yellow()
                } else {
                    "completed".green()
                };
                writeln!(out, "Session {} {}", summary.session_id, status)?;
                writeln!(
                    out,
                    "  {} files recorded ({} hashed, {} unchanged), {}",
                    summary.files_recorded.to_string().green(),
                    summary.files_hashed,
                    summary.files_reused,
                    format_bytes(summary.bytes_recorded)
                )?;
                if summary.files_vanished > 0 {
                    writeln!(
                        out,
                        "  {} files no longer present",
                        summary.files_vanished.to_string().cyan()
                    )?;
                }
                if summary.skipped_symlinks + summary.skipped_special > 0 {
                    writeln!(
                        out,
                        "  {} symbolic links and {} special files skipped",
                        summary.skipped_symlinks, summary.skipped_special
                    )?;
                }
                if !summary.failures.is_empty() {
                    writeln!(
                        out,
                        "  {} paths could not be read:",
                        summary.failures.len().to_string().yellow()
                    )?;
                    for failure in &summary.failures {
                        writeln!(
                            out,
                            "    {} {}: {}",
                            "!".yellow(),
                            failure.path.display(),
                            failure.reason
                        )?;
                    }
                }
                if summary.interrupted {
                    writeln!(
                        out,
                        "  {}",
                        "Scan was interrupted; vanished files were not checked.".yellow()
                    )?;
                }
                Ok(())
            }
        }
    }

    // ── Duplicates ───────────────────────────────────────────────

    pub fn duplicate_group(&mut self, group: &DuplicateGroup) -> Result<()> {
        match self.format {
            OutputFormat::Json => self.json(group),
            OutputFormat::Csv => {
                let fingerprint = group.fingerprint.to_hex();
                for path in group.paths() {
                    self.csv_row(DuplicateRow {
                        fingerprint: &fingerprint,
                        size_bytes: group.size_bytes,
                        path,
                    })?;
                }
                Ok(())
            }
            OutputFormat::Text => {
                let out = &mut self.out;
                writeln!(
                    out,
                    "{} {} copies of {}",
                    group.fingerprint.to_hex()[..16].cyan(),
                    group.members.len(),
                    format_bytes(group.size_bytes)
                )?;
                for path in group.paths() {
                    writeln!(out, "    {}", path)?;
                }
                Ok(())
            }
        }
    }

    pub fn duplicate_totals(&mut self, report: &DuplicateReport) -> Result<()> {
        if self.format != OutputFormat::Text {
            return Ok(());
        }
        if report.groups == 0 {
            writeln!(self.out, "No duplicate files found.")?;
            return Ok(());
        }
        writeln!(
            self.out,
            "{} duplicate groups, {} files, {} reclaimable",
            report.groups.to_string().red(),
            report.files.to_string().red(),
            format_bytes(report.wasted_bytes).red()
        )?;
        Ok(())
    }

    // ── Similarity ───────────────────────────────────────────────

    pub fn similar_pairs(&mut self, pairs: &[SimilarityPair]) -> Result<()> {
        match self.format {
            OutputFormat::Json => pairs.iter().try_for_each(|pair| self.json(pair)),
            OutputFormat::Csv => pairs.iter().try_for_each(|pair| self.csv_row(pair)),
            OutputFormat::Text => {
                if pairs.is_empty() {
                    writeln!(self.out, "No similar directories found.")?;
                }
                for pair in pairs {
                    writeln!(
                        self.out,
                        "{:>6.1}%  {} -> {}  ({}/{} files)",
                        pair.overlap * 100.0,
                        pair.source,
                        pair.target.cyan(),
                        pair.shared_files,
                        pair.source_files
                    )?;
                }
                Ok(())
            }
        }
    }

    // ── History, Sessions, Stats ─────────────────────────────────

    pub fn history(&mut self, path: &str, events: &[PathEvent]) -> Result<()> {
        match self.format {
            OutputFormat::Json => events.iter().try_for_each(|event| self.json(event)),
            OutputFormat::Csv => events
                .iter()
                .try_for_each(|event| self.csv_row(HistoryRow::from(event))),
            OutputFormat::Text => {
                if events.is_empty() {
                    writeln!(self.out, "No observations recorded for {}", path)?;
                }
                for event in events {
                    let when = format_micros(event.scanned_at());
                    match event {
                        PathEvent::Observed(obs) => writeln!(
                            self.out,
                            "{}  {}  {:>10}  {}",
                            when,
                            "observed".green(),
                            format_bytes(obs.size_bytes),
                            obs.fingerprint
                        )?,
                        PathEvent::Vanished { .. } => {
                            writeln!(self.out, "{}  {}", when, "vanished".yellow())?
                        }
                    }
                }
                Ok(())
            }
        }
    }

    pub fn sessions(&mut self, sessions: &[ScanSession]) -> Result<()> {
        match self.format {
            OutputFormat::Json => sessions.iter().try_for_each(|s| self.json(s)),
            OutputFormat::Csv => sessions
                .iter()
                .try_for_each(|s| self.csv_row(SessionRow::from(s))),
            OutputFormat::Text => {
                for s in sessions {
                    writeln!(
                        self.out,
                        "#{:<5} {:<12} {}  {} files, {} failed, {} vanished  {}",
                        s.id,
                        s.status.as_str(),
                        s.started_at,
                        s.files_recorded,
                        s.files_failed,
                        s.files_vanished,
                        s.root_paths.join(", ").dimmed()
                    )?;
                }
                Ok(())
            }
        }
    }

    pub fn stats(&mut self, stats: &CatalogStats) -> Result<()> {
        match self.format {
            OutputFormat::Json => self.json(stats),
            OutputFormat::Csv => self.csv_row(stats),
            OutputFormat::Text => {
                let out = &mut self.out;
                writeln!(out, "Observations:          {}", stats.observations)?;
                writeln!(out, "Current files:         {}", stats.current_files)?;
                writeln!(
                    out,
                    "Current size:          {}",
                    format_bytes(stats.current_bytes.max(0) as u64)
                )?;
                writeln!(out, "Distinct fingerprints: {}", stats.distinct_fingerprints)?;
                writeln!(out, "Scan sessions:         {}", stats.sessions)?;
                Ok(())
            }
        }
    }
}

#[derive(Serialize)]
struct FailureRow<'a> {
    path: String,
    reason: &'a str,
}

#[derive(Serialize)]
struct DuplicateRow<'a> {
    fingerprint: &'a str,
    size_bytes: u64,
    path: &'a str,
}

#[derive(Serialize)]
struct HistoryRow<'a> {
    event: &'static str,
    path: &'a str,
    scanned_at: String,
    size_bytes: Option<u64>,
    fingerprint: Option<String>,
    session_id: Option<i64>,
}

impl<'a> From<&'a PathEvent> for HistoryRow<'a> {
    fn from(event: &'a PathEvent) -> Self {
        match event {
            PathEvent::Observed(obs) => HistoryRow {
                event: "observed",
                path: &obs.path,
                scanned_at: format_micros(obs.scanned_at),
                size_bytes: Some(obs.size_bytes),
                fingerprint: Some(obs.fingerprint.to_hex()),
                session_id: obs.session_id,
            },
            PathEvent::Vanished {
                path,
                scanned_at,
                session_id,
                ..
            } => HistoryRow {
                event: "vanished",
                path,
                scanned_at: format_micros(*scanned_at),
                size_bytes: None,
                fingerprint: None,
                session_id: *session_id,
            },
        }
    }
}

#[derive(Serialize)]
struct SessionRow<'a> {
    id: i64,
    status: &'static str,
    started_at: &'a str,
    completed_at: Option<&'a str>,
    root_paths: String,
    files_recorded: i64,
    bytes_recorded: i64,
    files_failed: i64,
    files_vanished: i64,
}

impl<'a> From<&'a ScanSession> for SessionRow<'a> {
    fn from(s: &'a ScanSession) -> Self {
        SessionRow {
            id: s.id,
            status: s.status.as_str(),
            started_at: &s.started_at,
            completed_at: s.completed_at.as_deref(),
            root_paths: s.root_paths.join(";"),
            files_recorded: s.files_recorded,
            bytes_recorded: s.bytes_recorded,
            files_failed: s.files_failed,
            files_vanished: s.files_vanished,
        }
    }
}

fn format_micros(micros: i64) -> String {
    DateTime::<Utc>::from_timestamp_micros(micros)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| micros.to_string())
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
