use std::fs;
use std::io;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

/// The character sorting immediately after the path separator. Together with
/// `dir + SEPARATOR` it bounds every path below `dir` in byte order.
const SEPARATOR_SUCCESSOR: char = if cfg!(windows) { ']' } else { '0' };

/// Absolute, normalised form of a root directory. Existing paths are
/// canonicalised; paths that no longer exist (e.g. a `--root` filter for an
/// unmounted archive) are made absolute lexically.
pub fn normalize_path(path: &Path) -> io::Result<PathBuf> {
    match fs::canonicalize(path) {
        Ok(p) => Ok(p),
        Err(_) => std::path::absolute(path),
    }
}

pub fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Split a stored path into (parent_dir, file_name).
pub fn split_path(path: &str) -> (String, String) {
    let p = Path::new(path);
    let parent = p
        .parent()
        .map(|d| d.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = p
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());
    (parent, name)
}

/// Drop trailing separators and `.` components without touching the root.
pub fn clean_dir(dir: &str) -> String {
    let cleaned: PathBuf = Path::new(dir).components().collect();
    cleaned.to_string_lossy().into_owned()
}

/// Half-open range `[lower, upper)` containing exactly the paths strictly
/// below `dir`.
pub fn subtree_bounds(dir: &str) -> (String, String) {
    let base = dir.trim_end_matches(MAIN_SEPARATOR);
    (
        format!("{}{}", base, MAIN_SEPARATOR),
        format!("{}{}", base, SEPARATOR_SUCCESSOR),
    )
}

pub fn is_under(path: &str, dir: &str) -> bool {
    let (lower, upper) = subtree_bounds(dir);
    path >= lower.as_str() && path < upper.as_str()
}

/// Remove directories that are subdirectories of other directories in the list.
pub fn non_overlapping_directories(dirs: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for dir in dirs {
        if result.iter().any(|kept| dir.starts_with(kept)) {
            continue;
        }
        result.retain(|kept| !kept.starts_with(&dir));
        result.push(dir);
    }

    result
}
