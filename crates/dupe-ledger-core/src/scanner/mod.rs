//! Scanner: walks the roots, fingerprints every regular file on a rayon
//! worker pool and records the results through a single writer.
//!
//! Per-file problems never abort a scan; they are collected into the
//! [`ScanSummary`]. A catalog write failure does abort, because continuing
//! would leave files silently uncataloged.

pub mod walk;

use ahash::{AHashMap, AHashSet};
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, ScanConfig};
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprinter;
use crate::paths::{self, is_under, path_to_string};
use crate::progress::{CancelToken, ProgressReporter};
use crate::storage::{Catalog, FileObservation, NewObservation, SessionStatus, SessionTotals};

pub use walk::{WalkItem, Walker};

/// Results waiting for the writer; bounds memory when hashing outpaces SQLite.
const WRITE_QUEUE_DEPTH: usize = 1024;

/// A file the scan could not catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanFailure {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSummary {
    pub session_id: i64,
    pub roots: Vec<String>,
    pub files_recorded: u64,
    /// Files whose content was read and hashed this run.
    pub files_hashed: u64,
    /// Files whose previous fingerprint was reused (size and mtime unchanged).
    pub files_reused: u64,
    pub bytes_recorded: u64,
    pub files_vanished: u64,
    pub skipped_symlinks: u64,
    pub skipped_special: u64,
    pub failures: Vec<ScanFailure>,
    pub interrupted: bool,
    pub duration_secs: f64,
}

impl ScanSummary {
    pub fn warning_count(&self) -> usize {
        self.failures.len()
    }

    fn totals(&self) -> SessionTotals {
        SessionTotals {
            files_recorded: self.files_recorded,
            bytes_recorded: self.bytes_recorded,
            files_failed: self.failures.len() as u64,
            files_vanished: self.files_vanished,
        }
    }
}

/// What a worker hands to the writer for one walk item.
enum Outcome {
    Observed {
        observation: NewObservation,
        reused: bool,
    },
    Failed(ScanFailure),
    SkippedSymlink(PathBuf),
    SkippedSpecial(PathBuf),
}

pub struct Scanner {
    config: AppConfig,
    cancel: CancelToken,
}

impl Scanner {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Normalise the configured roots. Roots that are missing, unreadable or
    /// not directories come back as failures; nested roots collapse into
    /// their ancestor. Fails only when no usable root remains.
    pub fn resolve_roots(&self) -> Result<(Vec<PathBuf>, Vec<ScanFailure>)> {
        if self.config.root_paths.is_empty() {
            return Err(Error::config("no root directories given"));
        }

        let mut roots = Vec::with_capacity(self.config.root_paths.len());
        let mut rejected = Vec::new();
        for root in &self.config.root_paths {
            let path = Path::new(root);
            let resolved = match fs::metadata(path) {
                Ok(m) if m.is_dir() => fs::canonicalize(path)
                    .and_then(|canonical| fs::read_dir(&canonical).map(|_| canonical))
                    .map_err(|e| format!("root is not readable: {}", e)),
                Ok(_) => Err("root is not a directory".to_string()),
                Err(e) => Err(format!("root is not readable: {}", e)),
            };
            match resolved {
                Ok(canonical) => roots.push(canonical),
                Err(reason) => {
                    warn!("Skipping root {}: {}", root, reason);
                    rejected.push(ScanFailure {
                        path: path.to_path_buf(),
                        reason,
                    });
                }
            }
        }

        if roots.is_empty() {
            return Err(Error::config(format!(
                "no readable root directories among {:?}",
                self.config.root_paths
            )));
        }

        Ok((paths::non_overlapping_directories(roots), rejected))
    }

    /// Scan every configured root into `catalog`.
    pub fn scan(&self, catalog: &Catalog, reporter: &dyn ProgressReporter) -> Result<ScanSummary> {
        self.config.validate()?;
        let (roots, rejected_roots) = self.resolve_roots()?;
        let scan_config = &self.config.scan;
        let fingerprinter = Fingerprinter::new(scan_config.chunk_size)?;
        let walker = Walker::new(
            roots.clone(),
            &self.config.ignore_patterns,
            scan_config.follow_symlinks,
        )?;
        let pool = build_pool(scan_config.workers)?;

        let root_strings: Vec<String> = roots.iter().map(|r| path_to_string(r)).collect();
        info!("Scanning directories: {:?}", root_strings);

        let mut previous: AHashMap<String, FileObservation> = AHashMap::new();
        for root in &root_strings {
            for obs in catalog.latest_observations(Some(root))? {
                previous.insert(obs.path.clone(), obs);
            }
        }
        debug!("{} files already cataloged under the scan roots", previous.len());

        let session_id = catalog.begin_session(&root_strings)?;
        let start = Instant::now();
        reporter.on_scan_start(&root_strings);

        let mut summary = ScanSummary {
            session_id,
            roots: root_strings,
            failures: rejected_roots,
            ..ScanSummary::default()
        };
        let mut seen: AHashSet<String> = AHashSet::new();
        let abort = AtomicBool::new(false);
        // Set only when a worker actually gave up on remaining work.
        let stopped_early = AtomicBool::new(false);
        let mut fatal: Option<rusqlite::Error> = None;

        thread::scope(|scope| {
            let (tx, rx) = mpsc::sync_channel::<Outcome>(WRITE_QUEUE_DEPTH);
            let ctx = WorkerContext {
                fingerprinter: &fingerprinter,
                previous: &previous,
                scan_config,
                session_id,
                cancel: &self.cancel,
                abort: &abort,
            };
            let walker = &walker;
            let pool = pool.as_ref();
            let stopped_early = &stopped_early;

            scope.spawn(move || {
                let work = move || {
                    let _ = walker
                        .walk()
                        .par_bridge()
                        .try_for_each_with(tx, |tx, item| {
                            if ctx.should_stop() {
                                stopped_early.store(true, Ordering::SeqCst);
                                return Err(());
                            }
                            tx.send(ctx.process(item)).map_err(|_| ())
                        });
                };
                match pool {
                    Some(pool) => pool.install(work),
                    None => work(),
                }
            });

            for outcome in rx.iter() {
                match outcome {
                    Outcome::Observed {
                        observation,
                        reused,
                    } => match catalog.record(&observation) {
                        Ok(recorded) => {
                            summary.files_recorded += 1;
                            summary.bytes_recorded += recorded.size_bytes;
                            if reused {
                                summary.files_reused += 1;
                            } else {
                                summary.files_hashed += 1;
                            }
                            reporter.on_file_recorded(summary.files_recorded as usize, &recorded.path);
                            seen.insert(recorded.path);
                        }
                        Err(e) => {
                            error!("Failed to record {}: {}", observation.path, e);
                            abort.store(true, Ordering::SeqCst);
                            fatal = Some(e);
                            break;
                        }
                    },
                    Outcome::Failed(failure) => {
                        warn!("Skipping {}: {}", failure.path.display(), failure.reason);
                        reporter.on_file_failed(&failure.path, &failure.reason);
                        summary.failures.push(failure);
                    }
                    Outcome::SkippedSymlink(path) => {
                        debug!("Skipping symbolic link {}", path.display());
                        summary.skipped_symlinks += 1;
                    }
                    Outcome::SkippedSpecial(path) => {
                        debug!("Skipping non-regular file {}", path.display());
                        summary.skipped_special += 1;
                    }
                }
            }
            // Unblocks any worker still waiting on a full queue.
            drop(rx);
        });

        summary.failures.sort_by(|a, b| a.path.cmp(&b.path));

        if let Some(e) = fatal {
            if let Err(finish_err) =
                catalog.finish_session(session_id, SessionStatus::Failed, &summary.totals())
            {
                warn!("Could not mark session {} as failed: {}", session_id, finish_err);
            }
            return Err(Error::Catalog(e));
        }

        summary.interrupted = stopped_early.load(Ordering::SeqCst);
        if summary.interrupted {
            warn!("Scan interrupted; skipping vanished-file detection");
        } else if scan_config.record_vanished {
            reporter.on_vanished_start();
            summary.files_vanished =
                record_vanished(catalog, &walker, &previous, &seen, &summary.failures, session_id)?;
        }

        summary.duration_secs = start.elapsed().as_secs_f64();
        let status = if summary.interrupted {
            SessionStatus::Interrupted
        } else {
            SessionStatus::Completed
        };
        catalog.finish_session(session_id, status, &summary.totals())?;

        info!(
            "Scan {} in {:.2}s: {} files recorded ({} hashed, {} reused), {} vanished, {} warnings",
            status.as_str(),
            summary.duration_secs,
            summary.files_recorded,
            summary.files_hashed,
            summary.files_reused,
            summary.files_vanished,
            summary.warning_count(),
        );
        reporter.on_scan_complete(&summary);

        Ok(summary)
    }
}

fn build_pool(workers: usize) -> Result<Option<rayon::ThreadPool>> {
    if workers == 0 {
        return Ok(None);
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("fingerprint-{}", i))
        .build()
        .map(Some)
        .map_err(|e| Error::config(format!("cannot start {} workers: {}", workers, e)))
}

/// Borrowed state shared by the fingerprint workers.
#[derive(Clone, Copy)]
struct WorkerContext<'a> {
    fingerprinter: &'a Fingerprinter,
    previous: &'a AHashMap<String, FileObservation>,
    scan_config: &'a ScanConfig,
    session_id: i64,
    cancel: &'a CancelToken,
    abort: &'a AtomicBool,
}

impl WorkerContext<'_> {
    fn should_stop(&self) -> bool {
        self.cancel.is_cancelled() || self.abort.load(Ordering::SeqCst)
    }

    fn process(&self, item: WalkItem) -> Outcome {
        match item {
            WalkItem::File {
                path,
                size_bytes,
                mtime_ns,
            } => self.fingerprint(path, size_bytes, mtime_ns),
            WalkItem::Symlink(path) => Outcome::SkippedSymlink(path),
            WalkItem::Special(path) => Outcome::SkippedSpecial(path),
            WalkItem::Failed { path, reason } => Outcome::Failed(ScanFailure { path, reason }),
        }
    }

    fn fingerprint(&self, path: PathBuf, size_bytes: u64, mtime_ns: i64) -> Outcome {
        let path_str = path_to_string(&path);

        if self.scan_config.trust_mtime {
            if let Some(prev) = self.previous.get(&path_str) {
                if prev.size_bytes == size_bytes && prev.mtime_ns == mtime_ns {
                    return Outcome::Observed {
                        observation: NewObservation {
                            path: path_str,
                            size_bytes,
                            fingerprint: prev.fingerprint,
                            mtime_ns,
                            session_id: Some(self.session_id),
                        },
                        reused: true,
                    };
                }
            }
        }

        match self.fingerprinter.fingerprint_file(&path) {
            Ok(digest) => Outcome::Observed {
                observation: NewObservation {
                    path: path_str,
                    size_bytes: digest.size_bytes,
                    fingerprint: digest.fingerprint,
                    mtime_ns,
                    session_id: Some(self.session_id),
                },
                reused: false,
            },
            Err(e) => Outcome::Failed(ScanFailure {
                path,
                reason: e.to_string(),
            }),
        }
    }
}

/// Tombstone previously current paths that a complete walk no longer found.
/// Paths that failed, sit under a failed directory, or are now ignored keep
/// their last observation.
fn record_vanished(
    catalog: &Catalog,
    walker: &Walker,
    previous: &AHashMap<String, FileObservation>,
    seen: &AHashSet<String>,
    failures: &[ScanFailure],
    session_id: i64,
) -> Result<u64> {
    let failed: Vec<String> = failures.iter().map(|f| path_to_string(&f.path)).collect();

    let mut missing: Vec<&String> = previous
        .keys()
        .filter(|path| !seen.contains(*path))
        .filter(|path| {
            !failed
                .iter()
                .any(|f| path.as_str() == f.as_str() || is_under(path, f))
        })
        .filter(|path| !walker.is_ignored_anywhere(Path::new(path.as_str())))
        .collect();
    missing.sort();

    for path in &missing {
        catalog.record_vanished(path, Some(session_id))?;
        debug!("Recorded {} as vanished", path);
    }
    if !missing.is_empty() {
        info!("{} cataloged files no longer present", missing.len());
    }
    Ok(missing.len() as u64)
}
