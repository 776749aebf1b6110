use serde::Serialize;
use std::path::Path;
use tracing::info;

use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::paths::{normalize_path, path_to_string};
use crate::storage::{Catalog, FileObservation, FingerprintGroups};

/// Two or more current files with identical content.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    pub fingerprint: Fingerprint,
    pub size_bytes: u64,
    /// Sorted by path.
    pub members: Vec<FileObservation>,
    /// Bytes that would be freed by keeping a single copy.
    pub wasted_bytes: u64,
}

impl DuplicateGroup {
    fn from_members(fingerprint: Fingerprint, mut members: Vec<FileObservation>) -> Self {
        members.sort_by(|a, b| a.path.cmp(&b.path));
        let size_bytes = members.first().map(|m| m.size_bytes).unwrap_or(0);
        let wasted_bytes = size_bytes * (members.len() as u64).saturating_sub(1);
        Self {
            fingerprint,
            size_bytes,
            members,
            wasted_bytes,
        }
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.path.as_str())
    }
}

/// Lazy sequence of duplicate groups ordered by fingerprint.
pub struct DuplicateGroups<'c> {
    groups: FingerprintGroups<'c>,
}

impl Iterator for DuplicateGroups<'_> {
    type Item = Result<DuplicateGroup>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.groups.next()?;
        Some(
            next.map(|(fingerprint, members)| DuplicateGroup::from_members(fingerprint, members))
                .map_err(Into::into),
        )
    }
}

/// Duplicate groups among current observations, optionally restricted to
/// files below `root` (membership is decided after the restriction, so a
/// group never has fewer than two members).
pub fn find_duplicates<'c>(catalog: &'c Catalog, root: Option<&Path>) -> Result<DuplicateGroups<'c>> {
    let root = root.map(normalize_path).transpose()?.map(|p| path_to_string(&p));
    match &root {
        Some(r) => info!("Searching duplicates under {}", r),
        None => info!("Searching duplicates across the whole catalog"),
    }
    let groups = catalog.group_by_fingerprint(root.as_deref())?;
    Ok(DuplicateGroups { groups })
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DuplicateReport {
    pub groups: u64,
    pub files: u64,
    pub wasted_bytes: u64,
}

impl DuplicateReport {
    pub fn add(&mut self, group: &DuplicateGroup) {
        self.groups += 1;
        self.files += group.members.len() as u64;
        self.wasted_bytes += group.wasted_bytes;
    }
}
