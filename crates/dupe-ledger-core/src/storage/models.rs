use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::fingerprint::Fingerprint;

/// One scan's record of one file. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileObservation {
    /// Insertion sequence; later writes have larger ids.
    pub id: i64,
    pub path: String,
    pub file_name: String,
    pub parent_dir: String,
    pub size_bytes: u64,
    pub fingerprint: Fingerprint,
    /// File modification time, nanoseconds since the Unix epoch.
    pub mtime_ns: i64,
    /// Recording time, microseconds since the Unix epoch.
    pub scanned_at: i64,
    pub session_id: Option<i64>,
}

impl FileObservation {
    pub fn scanned_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(self.scanned_at)
    }

    pub fn mtime_utc(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.mtime_ns)
    }
}

/// What the scanner hands to [`Catalog::record`](super::Catalog::record).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewObservation {
    pub path: String,
    pub size_bytes: u64,
    pub fingerprint: Fingerprint,
    pub mtime_ns: i64,
    pub session_id: Option<i64>,
}

/// One entry of a path's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PathEvent {
    Observed(FileObservation),
    Vanished {
        id: i64,
        path: String,
        scanned_at: i64,
        session_id: Option<i64>,
    },
}

impl PathEvent {
    pub fn scanned_at(&self) -> i64 {
        match self {
            PathEvent::Observed(obs) => obs.scanned_at,
            PathEvent::Vanished { scanned_at, .. } => *scanned_at,
        }
    }
}

/// Whether a directory query covers only its direct children or the whole subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirScope {
    Immediate,
    Recursive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Interrupted => "interrupted",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(SessionStatus::Running),
            "completed" => Some(SessionStatus::Completed),
            "interrupted" => Some(SessionStatus::Interrupted),
            "failed" => Some(SessionStatus::Failed),
            _ => None,
        }
    }
}

/// One invocation of the scanner.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSession {
    pub id: i64,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: SessionStatus,
    pub root_paths: Vec<String>,
    pub files_recorded: i64,
    pub bytes_recorded: i64,
    pub files_failed: i64,
    pub files_vanished: i64,
}

/// Counters written when a session ends.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionTotals {
    pub files_recorded: u64,
    pub bytes_recorded: u64,
    pub files_failed: u64,
    pub files_vanished: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CatalogStats {
    pub observations: i64,
    pub current_files: i64,
    pub current_bytes: i64,
    pub distinct_fingerprints: i64,
    pub sessions: i64,
}
