use super::models::*;
use super::sqlite::Catalog;
use crate::fingerprint::Fingerprint;
use crate::paths::{clean_dir, split_path, subtree_bounds};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::{params, Params, Result, Row, Transaction};
use tracing::debug;

impl ToSql for Fingerprint {
    fn to_sql(&self) -> Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(ValueRef::Blob(&self.as_bytes()[..])))
    }
}

impl FromSql for Fingerprint {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let bytes = value.as_blob()?;
        Fingerprint::from_slice(bytes).ok_or(FromSqlError::InvalidBlobSize {
            expected_size: crate::fingerprint::FINGERPRINT_LEN,
            blob_size: bytes.len(),
        })
    }
}

const OBSERVATION_COLUMNS: &str =
    "id, path, file_name, parent_dir, size_bytes, fingerprint, mtime_ns, scanned_at, session_id";

fn observation_from_row(row: &Row<'_>) -> Result<FileObservation> {
    let size_bytes: i64 = row.get(4)?;
    Ok(FileObservation {
        id: row.get(0)?,
        path: row.get(1)?,
        file_name: row.get(2)?,
        parent_dir: row.get(3)?,
        size_bytes: size_bytes as u64,
        fingerprint: row.get(5)?,
        mtime_ns: row.get(6)?,
        scanned_at: row.get(7)?,
        session_id: row.get(8)?,
    })
}

fn query_observations<P: Params>(
    conn: &rusqlite::Connection,
    sql: &str,
    params: P,
) -> Result<Vec<FileObservation>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt
        .query_map(params, observation_from_row)?
        .collect::<Result<Vec<_>>>()?;
    Ok(rows)
}

fn now_micros() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

impl Catalog {
    // ── Observations ─────────────────────────────────────────────

    /// Append one observation. Earlier rows for the same path are left
    /// untouched. `scanned_at` is the current time, bumped past the path's
    /// previous observation if the clock has not moved on, so
    /// `(path, scanned_at)` stays unique and increasing.
    ///
    /// Runs as a single statement, so it commits atomically on its own.
    pub fn record(&self, observation: &NewObservation) -> Result<FileObservation> {
        let (parent_dir, file_name) = split_path(&observation.path);
        let mut stmt = self.connection().prepare_cached(
            "INSERT INTO observation \
             (path, file_name, parent_dir, size_bytes, fingerprint, mtime_ns, scanned_at, present, session_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, \
                     MAX(?7, COALESCE((SELECT MAX(scanned_at) + 1 FROM observation WHERE path = ?1), ?7)), \
                     1, ?8) \
             RETURNING id, scanned_at",
        )?;
        let (id, scanned_at): (i64, i64) = stmt.query_row(
            params![
                observation.path,
                file_name,
                parent_dir,
                observation.size_bytes as i64,
                observation.fingerprint,
                observation.mtime_ns,
                now_micros(),
                observation.session_id,
            ],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(FileObservation {
            id,
            path: observation.path.clone(),
            file_name,
            parent_dir,
            size_bytes: observation.size_bytes,
            fingerprint: observation.fingerprint,
            mtime_ns: observation.mtime_ns,
            scanned_at,
            session_id: observation.session_id,
        })
    }

    /// Append a tombstone: the path was not found by a complete scan of a
    /// root that contains it.
    pub fn record_vanished(&self, path: &str, session_id: Option<i64>) -> Result<i64> {
        let (parent_dir, file_name) = split_path(path);
        let mut stmt = self.connection().prepare_cached(
            "INSERT INTO observation \
             (path, file_name, parent_dir, size_bytes, fingerprint, mtime_ns, scanned_at, present, session_id) \
             VALUES (?1, ?2, ?3, 0, NULL, 0, \
                     MAX(?4, COALESCE((SELECT MAX(scanned_at) + 1 FROM observation WHERE path = ?1), ?4)), \
                     0, ?5) \
             RETURNING id",
        )?;
        stmt.query_row(
            params![path, file_name, parent_dir, now_micros(), session_id],
            |row| row.get(0),
        )
    }

    /// Latest observation per path, optionally restricted to paths below
    /// `root`. Sorted by path.
    pub fn latest_observations(&self, root: Option<&str>) -> Result<Vec<FileObservation>> {
        match root {
            None => query_observations(
                self.connection(),
                &format!(
                    "SELECT {} FROM current_observation ORDER BY path",
                    OBSERVATION_COLUMNS
                ),
                [],
            ),
            Some(root) => {
                let (lower, upper) = subtree_bounds(root);
                query_observations(
                    self.connection(),
                    &format!(
                        "SELECT {} FROM current_observation \
                         WHERE path >= ?1 AND path < ?2 ORDER BY path",
                        OBSERVATION_COLUMNS
                    ),
                    params![lower, upper],
                )
            }
        }
    }

    pub fn latest_observation(&self, path: &str) -> Result<Option<FileObservation>> {
        let mut rows = query_observations(
            self.connection(),
            &format!(
                "SELECT {} FROM current_observation WHERE path = ?1",
                OBSERVATION_COLUMNS
            ),
            params![path],
        )?;
        Ok(rows.pop())
    }

    /// Current observations directly inside `directory`, or anywhere below
    /// it. Sorted by path.
    pub fn observations_under(
        &self,
        directory: &str,
        scope: DirScope,
    ) -> Result<Vec<FileObservation>> {
        let directory = clean_dir(directory);
        match scope {
            DirScope::Immediate => query_observations(
                self.connection(),
                &format!(
                    "SELECT {} FROM current_observation WHERE parent_dir = ?1 ORDER BY path",
                    OBSERVATION_COLUMNS
                ),
                params![directory],
            ),
            DirScope::Recursive => self.latest_observations(Some(&directory)),
        }
    }

    /// Every event recorded for `path`, oldest first.
    pub fn history(&self, path: &str) -> Result<Vec<PathEvent>> {
        let mut stmt = self.connection().prepare_cached(&format!(
            "SELECT {}, present FROM observation WHERE path = ?1 ORDER BY scanned_at, id",
            OBSERVATION_COLUMNS
        ))?;
        let events = stmt
            .query_map(params![path], |row| {
                let present: bool = row.get(9)?;
                if present {
                    Ok(PathEvent::Observed(observation_from_row(row)?))
                } else {
                    Ok(PathEvent::Vanished {
                        id: row.get(0)?,
                        path: row.get(1)?,
                        scanned_at: row.get(7)?,
                        session_id: row.get(8)?,
                    })
                }
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(events)
    }

    // ── Fingerprint Groups ───────────────────────────────────────

    /// Lazily yield (fingerprint, current observations) for every
    /// fingerprint shared by at least two current paths, in fingerprint
    /// order. The whole iteration reads one snapshot of the catalog.
    pub fn group_by_fingerprint(&self, root: Option<&str>) -> Result<FingerprintGroups<'_>> {
        let snapshot = self.connection().unchecked_transaction()?;
        let bounds = root.map(subtree_bounds);

        let shared: Vec<Fingerprint> = {
            let (sql, bound_params) = match &bounds {
                None => (
                    "SELECT fingerprint FROM current_observation \
                     GROUP BY fingerprint HAVING COUNT(*) >= 2 ORDER BY fingerprint",
                    Vec::new(),
                ),
                Some((lower, upper)) => (
                    "SELECT fingerprint FROM current_observation \
                     WHERE path >= ?1 AND path < ?2 \
                     GROUP BY fingerprint HAVING COUNT(*) >= 2 ORDER BY fingerprint",
                    vec![lower.clone(), upper.clone()],
                ),
            };
            let mut stmt = snapshot.prepare(sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(bound_params.iter()), |row| row.get(0))?
                .collect::<Result<Vec<_>>>()?;
            rows
        };

        debug!("{} fingerprints shared by two or more current files", shared.len());

        Ok(FingerprintGroups {
            snapshot,
            bounds,
            pending: shared.into_iter(),
        })
    }

    // ── Scan Sessions ────────────────────────────────────────────

    pub fn begin_session(&self, root_paths: &[String]) -> Result<i64> {
        let mut sorted = root_paths.to_vec();
        sorted.sort();
        let paths_json = serde_json::to_string(&sorted)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        let now = chrono::Utc::now().to_rfc3339();
        self.connection().execute(
            "INSERT INTO scan_session (started_at, status, root_paths) VALUES (?1, ?2, ?3)",
            params![now, SessionStatus::Running.as_str(), paths_json],
        )?;
        let id = self.connection().last_insert_rowid();
        debug!("Created scan session {} for paths: {}", id, paths_json);
        Ok(id)
    }

    pub fn finish_session(
        &self,
        session_id: i64,
        status: SessionStatus,
        totals: &SessionTotals,
    ) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.connection().execute(
            "UPDATE scan_session SET completed_at = ?1, status = ?2, files_recorded = ?3, \
             bytes_recorded = ?4, files_failed = ?5, files_vanished = ?6 WHERE id = ?7",
            params![
                now,
                status.as_str(),
                totals.files_recorded as i64,
                totals.bytes_recorded as i64,
                totals.files_failed as i64,
                totals.files_vanished as i64,
                session_id
            ],
        )?;
        debug!("Scan session {} finished as {}", session_id, status.as_str());
        Ok(())
    }

    /// Sessions newest first.
    pub fn list_sessions(&self) -> Result<Vec<ScanSession>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, started_at, completed_at, status, root_paths, files_recorded, \
                    bytes_recorded, files_failed, files_vanished \
             FROM scan_session ORDER BY id DESC",
        )?;
        let sessions = stmt
            .query_map([], |row| {
                let status: String = row.get(3)?;
                let roots: String = row.get(4)?;
                Ok(ScanSession {
                    id: row.get(0)?,
                    started_at: row.get(1)?,
                    completed_at: row.get(2)?,
                    status: SessionStatus::parse(&status).ok_or_else(|| {
                        rusqlite::Error::FromSqlConversionFailure(
                            3,
                            Type::Text,
                            format!("unknown session status '{}'", status).into(),
                        )
                    })?,
                    root_paths: serde_json::from_str(&roots).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e))
                    })?,
                    files_recorded: row.get(5)?,
                    bytes_recorded: row.get(6)?,
                    files_failed: row.get(7)?,
                    files_vanished: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(sessions)
    }

    pub fn stats(&self) -> Result<CatalogStats> {
        self.connection().query_row(
            "SELECT \
                (SELECT COUNT(*) FROM observation), \
                (SELECT COUNT(*) FROM current_observation), \
                (SELECT COALESCE(SUM(size_bytes), 0) FROM current_observation), \
                (SELECT COUNT(DISTINCT fingerprint) FROM current_observation), \
                (SELECT COUNT(*) FROM scan_session)",
            [],
            |row| {
                Ok(CatalogStats {
                    observations: row.get(0)?,
                    current_files: row.get(1)?,
                    current_bytes: row.get(2)?,
                    distinct_fingerprints: row.get(3)?,
                    sessions: row.get(4)?,
                })
            },
        )
    }
}

/// Iterator returned by [`Catalog::group_by_fingerprint`].
///
/// Holds a read transaction open until dropped so every group comes from
/// the same catalog state.
pub struct FingerprintGroups<'c> {
    snapshot: Transaction<'c>,
    bounds: Option<(String, String)>,
    pending: std::vec::IntoIter<Fingerprint>,
}

impl FingerprintGroups<'_> {
    /// Number of groups not yet yielded.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    fn members(&self, fingerprint: &Fingerprint) -> Result<Vec<FileObservation>> {
        match &self.bounds {
            None => query_observations(
                &self.snapshot,
                &format!(
                    "SELECT {} FROM current_observation WHERE fingerprint = ?1 ORDER BY path",
                    OBSERVATION_COLUMNS
                ),
                params![fingerprint],
            ),
            Some((lower, upper)) => query_observations(
                &self.snapshot,
                &format!(
                    "SELECT {} FROM current_observation \
                     WHERE fingerprint = ?1 AND path >= ?2 AND path < ?3 ORDER BY path",
                    OBSERVATION_COLUMNS
                ),
                params![fingerprint, lower, upper],
            ),
        }
    }
}

impl Iterator for FingerprintGroups<'_> {
    type Item = Result<(Fingerprint, Vec<FileObservation>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let fingerprint = self.pending.next()?;
            match self.members(&fingerprint) {
                Ok(members) if members.len() >= 2 => return Some(Ok((fingerprint, members))),
                Ok(_) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
