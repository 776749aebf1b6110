use ahash::AHashMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::{validate_threshold, DEFAULT_SIMILARITY_THRESHOLD};
use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::paths::{normalize_path, path_to_string};
use crate::storage::{Catalog, FileObservation};

/// Which directory pairs are compared at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonScope {
    /// Every pair of directories sharing at least one entry.
    #[default]
    All,
    /// Only directories with the same parent.
    Siblings,
    /// Only directories with the same basename (e.g. `a/photos` vs `b/photos`).
    SameName,
}

#[derive(Debug, Clone)]
pub struct SimilarityOptions {
    pub threshold: f64,
    pub scope: ComparisonScope,
    /// Restrict the analysis to directories below this path.
    pub root: Option<PathBuf>,
    /// Ignore (name, fingerprint) entries present in more than this many
    /// directories. Speeds up trees full of boilerplate files at the cost of
    /// undercounting overlap for those directories.
    pub max_key_fanout: Option<usize>,
}

impl Default for SimilarityOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            scope: ComparisonScope::All,
            root: None,
            max_key_fanout: None,
        }
    }
}

/// `overlap` of `source` with `target`: the share of `source`'s files whose
/// (name, fingerprint) also appears in `target`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityPair {
    pub source: String,
    pub target: String,
    pub shared_files: usize,
    pub source_files: usize,
    pub target_files: usize,
    pub overlap: f64,
}

/// One directory's current file set.
struct DirEntrySet {
    path: String,
    file_count: usize,
    /// Id of the parent or basename, depending on the scope; equal ids may be compared.
    scope_key: u32,
}

/// Find directed directory pairs whose overlap reaches `options.threshold`.
///
/// Candidates come from an inverted index (name, fingerprint) → directories,
/// so above threshold 0 only pairs sharing at least one entry are scored. At
/// threshold 0 every pair allowed by the scope qualifies, so pairs without a
/// shared entry are added with an overlap of 0. Self pairs are excluded.
/// Results are sorted by overlap (descending), then source, then target.
pub fn find_similar_directories(
    catalog: &Catalog,
    options: &SimilarityOptions,
) -> Result<Vec<SimilarityPair>> {
    validate_threshold(options.threshold)?;
    let root = options
        .root
        .as_deref()
        .map(normalize_path)
        .transpose()?
        .map(|p| path_to_string(&p));

    info!(
        "Computing directory similarity (threshold={:.2}, scope={:?})...",
        options.threshold, options.scope
    );

    let observations = catalog.latest_observations(root.as_deref())?;
    Ok(similar_directories(&observations, options))
}

/// Core of [`find_similar_directories`], over an already loaded file set.
pub fn similar_directories(
    observations: &[FileObservation],
    options: &SimilarityOptions,
) -> Vec<SimilarityPair> {
    let (dirs, index) = build_index(observations, options.scope);
    if dirs.len() < 2 {
        return Vec::new();
    }

    // Shared entry counts per unordered pair (lower id first).
    let mut shared: AHashMap<(u32, u32), usize> = AHashMap::new();
    let mut skipped_keys = 0usize;
    for dir_ids in index.values() {
        if dir_ids.len() < 2 {
            continue;
        }
        if options.max_key_fanout.is_some_and(|max| dir_ids.len() > max) {
            skipped_keys += 1;
            continue;
        }
        for i in 0..dir_ids.len() {
            for j in (i + 1)..dir_ids.len() {
                let (a, b) = (dir_ids[i], dir_ids[j]);
                if dirs[a as usize].scope_key != dirs[b as usize].scope_key {
                    continue;
                }
                let key = if a < b { (a, b) } else { (b, a) };
                *shared.entry(key).or_insert(0) += 1;
            }
        }
    }

    let threshold = options.threshold;
    if threshold <= 0.0 {
        for a in 0..dirs.len() as u32 {
            for b in (a + 1)..dirs.len() as u32 {
                if dirs[a as usize].scope_key == dirs[b as usize].scope_key {
                    shared.entry((a, b)).or_insert(0);
                }
            }
        }
    }

    debug!(
        "{} directories, {} candidate pairs, {} noisy entries skipped",
        dirs.len(),
        shared.len(),
        skipped_keys
    );

    let candidates: Vec<((u32, u32), usize)> = shared.into_iter().collect();
    let mut pairs: Vec<SimilarityPair> = candidates
        .par_iter()
        .flat_map_iter(|&((a, b), count)| {
            let a = &dirs[a as usize];
            let b = &dirs[b as usize];
            [score(a, b, count), score(b, a, count)]
                .into_iter()
                .filter(move |pair| pair.overlap >= threshold)
        })
        .collect();

    pairs.sort_by(|x, y| {
        y.overlap
            .total_cmp(&x.overlap)
            .then_with(|| x.source.cmp(&y.source))
            .then_with(|| x.target.cmp(&y.target))
    });

    info!("Found {} similar directory pairs", pairs.len());
    pairs
}

fn score(source: &DirEntrySet, target: &DirEntrySet, shared_files: usize) -> SimilarityPair {
    SimilarityPair {
        source: source.path.clone(),
        target: target.path.clone(),
        shared_files,
        source_files: source.file_count,
        target_files: target.file_count,
        overlap: shared_files as f64 / source.file_count as f64,
    }
}

/// Group observations by parent directory and build the
/// (name, fingerprint) → directory ids index. Every directory returned holds
/// at least one file, so the overlap denominator is never zero.
fn build_index(
    observations: &[FileObservation],
    scope: ComparisonScope,
) -> (Vec<DirEntrySet>, AHashMap<(&str, Fingerprint), Vec<u32>>) {
    let mut dirs: Vec<DirEntrySet> = Vec::new();
    let mut dir_ids: AHashMap<&str, u32> = AHashMap::new();
    let mut scope_ids: AHashMap<String, u32> = AHashMap::new();
    let mut index: AHashMap<(&str, Fingerprint), Vec<u32>> = AHashMap::new();

    for obs in observations {
        let dir_id = match dir_ids.get(obs.parent_dir.as_str()) {
            Some(&id) => id,
            None => {
                let id = dirs.len() as u32;
                let scope_name = match scope {
                    ComparisonScope::All => String::new(),
                    ComparisonScope::Siblings => parent_of(&obs.parent_dir),
                    ComparisonScope::SameName => basename_of(&obs.parent_dir),
                };
                let next_scope_id = scope_ids.len() as u32;
                let scope_key = *scope_ids.entry(scope_name).or_insert(next_scope_id);
                dirs.push(DirEntrySet {
                    path: obs.parent_dir.clone(),
                    file_count: 0,
                    scope_key,
                });
                dir_ids.insert(obs.parent_dir.as_str(), id);
                id
            }
        };
        dirs[dir_id as usize].file_count += 1;
        index
            .entry((obs.file_name.as_str(), obs.fingerprint))
            .or_default()
            .push(dir_id);
    }

    (dirs, index)
}

fn parent_of(dir: &str) -> String {
    Path::new(dir)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn basename_of(dir: &str) -> String {
    Path::new(dir)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.to_string())
}
