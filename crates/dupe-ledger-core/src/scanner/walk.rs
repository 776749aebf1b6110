use glob::Pattern;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::error::{Error, Result};

/// One entry produced by the directory walk.
#[derive(Debug)]
pub enum WalkItem {
    File {
        path: PathBuf,
        size_bytes: u64,
        mtime_ns: i64,
    },
    /// A symbolic link seen while links are not being followed.
    Symlink(PathBuf),
    /// FIFO, socket, device node: never opened.
    Special(PathBuf),
    /// Unreadable directory, metadata failure, link cycle or dangling link.
    Failed { path: PathBuf, reason: String },
}

/// Recursive enumeration of regular files under a set of roots, pruned by
/// glob ignore patterns. Traversal order is whatever the filesystem gives.
pub struct Walker {
    roots: Vec<PathBuf>,
    ignore_patterns: Vec<Pattern>,
    follow_symlinks: bool,
}

impl Walker {
    pub fn new(roots: Vec<PathBuf>, ignore_globs: &[String], follow_symlinks: bool) -> Result<Self> {
        let ignore_patterns = ignore_globs
            .iter()
            .map(|glob| {
                Pattern::new(glob)
                    .map_err(|e| Error::config(format!("invalid ignore pattern '{}': {}", glob, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            roots,
            ignore_patterns,
            follow_symlinks,
        })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        self.ignore_patterns
            .iter()
            .any(|pattern| pattern.matches_path(path))
    }

    /// True if the path or any of its ancestors matches an ignore pattern.
    pub fn is_ignored_anywhere(&self, path: &Path) -> bool {
        path.ancestors().any(|p| self.is_ignored(p))
    }

    pub fn walk(&self) -> impl Iterator<Item = WalkItem> + Send + '_ {
        self.roots.iter().flat_map(move |root| {
            debug!("Walking {}", root.display());
            WalkDir::new(root)
                .follow_links(self.follow_symlinks)
                .into_iter()
                .filter_entry(move |entry| !self.is_ignored(entry.path()))
                .filter_map(move |entry| match entry {
                    Ok(entry) => classify(entry),
                    Err(err) => {
                        let path = err
                            .path()
                            .map(Path::to_path_buf)
                            .unwrap_or_else(|| root.clone());
                        let reason = match err.loop_ancestor() {
                            Some(ancestor) => {
                                format!("symbolic link cycle back to {}", ancestor.display())
                            }
                            None => err.to_string(),
                        };
                        Some(WalkItem::Failed { path, reason })
                    }
                })
        })
    }
}

fn classify(entry: DirEntry) -> Option<WalkItem> {
    let file_type = entry.file_type();
    if file_type.is_dir() {
        return None;
    }
    if file_type.is_symlink() {
        return Some(WalkItem::Symlink(entry.into_path()));
    }
    if !file_type.is_file() {
        return Some(WalkItem::Special(entry.into_path()));
    }

    match entry.metadata() {
        Ok(metadata) => {
            let mtime_ns = metadata.modified().map(system_time_to_nanos).unwrap_or(0);
            Some(WalkItem::File {
                size_bytes: metadata.len(),
                mtime_ns,
                path: entry.into_path(),
            })
        }
        Err(err) => Some(WalkItem::Failed {
            path: entry.into_path(),
            reason: err.to_string(),
        }),
    }
}

/// Nanoseconds relative to the Unix epoch; negative for earlier times.
pub fn system_time_to_nanos(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
        Err(e) => i64::try_from(e.duration().as_nanos())
            .map(|n| -n)
            .unwrap_or(i64::MIN),
    }
}
