use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

use dupe_ledger_core::analysis::{find_duplicates, find_similar_directories, SimilarityOptions};
use dupe_ledger_core::storage::{Catalog, PathEvent, SessionStatus};
use dupe_ledger_core::{AppConfig, CancelToken, Error, ProgressReporter, Scanner, SilentReporter};

/// Layout:
///   root/
///     folder_a/
///       unique_a.txt     ("unique content a")
///       shared.txt       ("shared content xyz")
///     folder_b/
///       unique_b.txt     ("unique content b")
///       shared.txt       ("shared content xyz")
///     folder_c/
///       large_dup_1.bin  (4KB of 0xAA)
///       large_dup_2.bin  (4KB of 0xAA)
fn create_test_tree(root: &Path) {
    let folder_a = root.join("folder_a");
    let folder_b = root.join("folder_b");
    let folder_c = root.join("folder_c");
    fs::create_dir_all(&folder_a).unwrap();
    fs::create_dir_all(&folder_b).unwrap();
    fs::create_dir_all(&folder_c).unwrap();

    fs::write(folder_a.join("unique_a.txt"), "unique content a").unwrap();
    fs::write(folder_b.join("unique_b.txt"), "unique content b").unwrap();
    fs::write(folder_a.join("shared.txt"), "shared content xyz").unwrap();
    fs::write(folder_b.join("shared.txt"), "shared content xyz").unwrap();

    let large_content = vec![0xAAu8; 4096];
    fs::write(folder_c.join("large_dup_1.bin"), &large_content).unwrap();
    fs::write(folder_c.join("large_dup_2.bin"), &large_content).unwrap();
}

fn config_for(roots: &[&Path]) -> AppConfig {
    AppConfig {
        root_paths: roots
            .iter()
            .map(|r| r.to_string_lossy().into_owned())
            .collect(),
        ..AppConfig::default()
    }
}

fn canonical_root() -> (tempfile::TempDir, PathBuf) {
    let tmp = tempdir().unwrap();
    let root = fs::canonicalize(tmp.path()).unwrap().join("scan_root");
    create_test_tree(&root);
    (tmp, root)
}

fn observation_rows(catalog: &Catalog) -> i64 {
    catalog
        .connection()
        .query_row("SELECT COUNT(*) FROM observation", [], |row| row.get(0))
        .unwrap()
}

#[test]
fn test_full_scan_pipeline() {
    let (_tmp, root) = canonical_root();
    let catalog = Catalog::open_in_memory().unwrap();

    let summary = Scanner::new(config_for(&[&root]))
        .scan(&catalog, &SilentReporter)
        .unwrap();

    assert_eq!(summary.files_recorded, 6);
    assert_eq!(summary.files_hashed, 6);
    assert_eq!(summary.bytes_recorded, 16 * 2 + 18 * 2 + 4096 * 2);
    assert!(summary.failures.is_empty());
    assert!(!summary.interrupted);
    assert_eq!(summary.roots, vec![root.to_string_lossy().into_owned()]);

    let current = catalog.latest_observations(None).unwrap();
    assert_eq!(current.len(), 6);
    assert!(current
        .iter()
        .all(|o| o.session_id == Some(summary.session_id)));

    let sessions = catalog.list_sessions().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, SessionStatus::Completed);
    assert_eq!(sessions[0].files_recorded, 6);
}

#[test]
fn test_rescan_appends_new_observations() {
    let (_tmp, root) = canonical_root();
    let catalog = Catalog::open_in_memory().unwrap();
    let scanner = Scanner::new(config_for(&[&root]));

    scanner.scan(&catalog, &SilentReporter).unwrap();
    let second = scanner.scan(&catalog, &SilentReporter).unwrap();

    assert_eq!(observation_rows(&catalog), 12);
    assert_eq!(catalog.latest_observations(None).unwrap().len(), 6);
    assert_eq!(second.files_reused, 6);
    assert_eq!(second.files_hashed, 0);
    assert_eq!(second.files_vanished, 0);

    let path = root.join("folder_a/shared.txt");
    let history = catalog.history(&path.to_string_lossy()).unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[1].scanned_at() > history[0].scanned_at());
}

#[test]
fn test_verify_mode_rehashes_everything() {
    let (_tmp, root) = canonical_root();
    let catalog = Catalog::open_in_memory().unwrap();
    Scanner::new(config_for(&[&root]))
        .scan(&catalog, &SilentReporter)
        .unwrap();

    let mut config = config_for(&[&root]);
    config.scan.trust_mtime = false;
    let summary = Scanner::new(config).scan(&catalog, &SilentReporter).unwrap();
    assert_eq!(summary.files_hashed, 6);
    assert_eq!(summary.files_reused, 0);
}

#[test]
fn test_changed_size_forces_rehash() {
    let (_tmp, root) = canonical_root();
    let catalog = Catalog::open_in_memory().unwrap();
    let scanner = Scanner::new(config_for(&[&root]));
    scanner.scan(&catalog, &SilentReporter).unwrap();

    let changed = root.join("folder_a/unique_a.txt");
    fs::write(&changed, "completely different and longer content").unwrap();
    let summary = scanner.scan(&catalog, &SilentReporter).unwrap();

    assert_eq!(summary.files_hashed, 1);
    assert_eq!(summary.files_reused, 5);
    let latest = catalog
        .latest_observation(&changed.to_string_lossy())
        .unwrap()
        .unwrap();
    assert_eq!(
        latest.fingerprint,
        dupe_ledger_core::Fingerprint::of_bytes(b"completely different and longer content")
    );
}

#[test]
fn test_empty_files_share_a_fingerprint() {
    let tmp = tempdir().unwrap();
    let root = fs::canonicalize(tmp.path()).unwrap();
    fs::write(root.join("empty1"), "").unwrap();
    fs::write(root.join("empty2"), "").unwrap();
    let catalog = Catalog::open_in_memory().unwrap();

    Scanner::new(config_for(&[&root]))
        .scan(&catalog, &SilentReporter)
        .unwrap();

    let groups: Vec<_> = catalog
        .group_by_fingerprint(None)
        .unwrap()
        .map(|g| g.unwrap())
        .collect();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].1.len(), 2);
    assert!(groups[0].1.iter().all(|o| o.size_bytes == 0));
}

#[test]
fn test_vanished_files_are_tombstoned() {
    let (_tmp, root) = canonical_root();
    let catalog = Catalog::open_in_memory().unwrap();
    let scanner = Scanner::new(config_for(&[&root]));
    scanner.scan(&catalog, &SilentReporter).unwrap();

    let removed = root.join("folder_b/unique_b.txt");
    fs::remove_file(&removed).unwrap();
    let summary = scanner.scan(&catalog, &SilentReporter).unwrap();

    assert_eq!(summary.files_vanished, 1);
    assert_eq!(catalog.latest_observations(None).unwrap().len(), 5);
    let history = catalog.history(&removed.to_string_lossy()).unwrap();
    assert!(matches!(history.last(), Some(PathEvent::Vanished { .. })));
}

#[test]
fn test_vanished_detection_can_be_disabled() {
    let (_tmp, root) = canonical_root();
    let catalog = Catalog::open_in_memory().unwrap();
    let mut config = config_for(&[&root]);
    config.scan.record_vanished = false;
    let scanner = Scanner::new(config);
    scanner.scan(&catalog, &SilentReporter).unwrap();

    fs::remove_file(root.join("folder_b/unique_b.txt")).unwrap();
    let summary = scanner.scan(&catalog, &SilentReporter).unwrap();

    assert_eq!(summary.files_vanished, 0);
    assert_eq!(catalog.latest_observations(None).unwrap().len(), 6);
}

#[test]
fn test_scan_with_ignore_patterns() {
    let (_tmp, root) = canonical_root();
    let catalog = Catalog::open_in_memory().unwrap();
    let mut config = config_for(&[&root]);
    config.ignore_patterns = vec!["*/folder_c".to_string()];

    let summary = Scanner::new(config).scan(&catalog, &SilentReporter).unwrap();
    assert_eq!(summary.files_recorded, 4);
    assert!(catalog
        .latest_observations(None)
        .unwrap()
        .iter()
        .all(|o| !o.path.contains("folder_c")));
}

#[test]
fn test_nested_roots_scan_files_once() {
    let (_tmp, root) = canonical_root();
    let catalog = Catalog::open_in_memory().unwrap();
    let nested = root.join("folder_a");

    let summary = Scanner::new(config_for(&[&nested, &root]))
        .scan(&catalog, &SilentReporter)
        .unwrap();
    assert_eq!(summary.files_recorded, 6);
    assert_eq!(summary.roots.len(), 1);
}

#[test]
fn test_pre_cancelled_scan_is_interrupted() {
    let (_tmp, root) = canonical_root();
    let catalog = Catalog::open_in_memory().unwrap();
    let scanner = Scanner::new(config_for(&[&root]));
    scanner.scan(&catalog, &SilentReporter).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let summary = Scanner::new(config_for(&[&root]))
        .with_cancel_token(cancel)
        .scan(&catalog, &SilentReporter)
        .unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.files_vanished, 0);
    // Nothing seen by an interrupted run is taken as vanished.
    assert_eq!(catalog.latest_observations(None).unwrap().len(), 6);
    let sessions = catalog.list_sessions().unwrap();
    assert_eq!(sessions[0].status, SessionStatus::Interrupted);
}

#[test]
fn test_no_usable_root_is_config_error() {
    let tmp = tempdir().unwrap();
    let catalog = Catalog::open_in_memory().unwrap();

    let missing = tmp.path().join("does_not_exist");
    let result = Scanner::new(config_for(&[&missing])).scan(&catalog, &SilentReporter);
    assert!(matches!(result, Err(Error::Config(_))));

    let file = tmp.path().join("plain.txt");
    fs::write(&file, "x").unwrap();
    let result = Scanner::new(config_for(&[&file])).scan(&catalog, &SilentReporter);
    assert!(matches!(result, Err(Error::Config(_))));

    let result = Scanner::new(AppConfig::default()).scan(&catalog, &SilentReporter);
    assert!(matches!(result, Err(Error::Config(_))));

    // Nothing was started for a rejected configuration.
    assert!(catalog.list_sessions().unwrap().is_empty());
}

#[test]
fn test_one_missing_root_does_not_stop_the_others() {
    let (tmp, root) = canonical_root();
    let missing = tmp.path().join("unmounted_archive");
    let catalog = Catalog::open_in_memory().unwrap();

    let summary = Scanner::new(config_for(&[&missing, &root]))
        .scan(&catalog, &SilentReporter)
        .unwrap();

    assert_eq!(summary.files_recorded, 6);
    assert_eq!(summary.roots, vec![root.to_string_lossy().into_owned()]);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].path, missing);
    assert_eq!(catalog.list_sessions().unwrap()[0].status, SessionStatus::Completed);
}

/// Cancels the scan once the given number of files has been recorded.
struct CancelAfter {
    files: usize,
    token: CancelToken,
}

impl ProgressReporter for CancelAfter {
    fn on_file_recorded(&self, files_recorded: usize, _path: &str) {
        if files_recorded >= self.files {
            self.token.cancel();
        }
    }
}

#[test]
fn test_cancel_after_last_file_leaves_run_complete() {
    let (_tmp, root) = canonical_root();
    let catalog = Catalog::open_in_memory().unwrap();
    Scanner::new(config_for(&[&root]))
        .scan(&catalog, &SilentReporter)
        .unwrap();
    fs::remove_file(root.join("folder_b/unique_b.txt")).unwrap();

    let token = CancelToken::new();
    let reporter = CancelAfter {
        files: 5,
        token: token.clone(),
    };
    let summary = Scanner::new(config_for(&[&root]))
        .with_cancel_token(token.clone())
        .scan(&catalog, &reporter)
        .unwrap();

    assert!(token.is_cancelled());
    assert!(!summary.interrupted);
    assert_eq!(summary.files_recorded, 5);
    assert_eq!(summary.files_vanished, 1);
    assert_eq!(catalog.list_sessions().unwrap()[0].status, SessionStatus::Completed);
}

#[test]
fn test_catalog_write_failure_aborts_scan() {
    let (_tmp, root) = canonical_root();
    let catalog = Catalog::open_in_memory().unwrap();
    catalog
        .connection()
        .execute_batch(
            "CREATE TRIGGER reject_unique_b BEFORE INSERT ON observation
             WHEN NEW.file_name = 'unique_b.txt'
             BEGIN SELECT RAISE(ABORT, 'simulated write failure'); END;",
        )
        .unwrap();

    let result = Scanner::new(config_for(&[&root])).scan(&catalog, &SilentReporter);

    assert!(matches!(result, Err(Error::Catalog(_))));
    let sessions = catalog.list_sessions().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, SessionStatus::Failed);
    assert!(catalog
        .latest_observations(None)
        .unwrap()
        .iter()
        .all(|o| o.file_name != "unique_b.txt"));
}

#[test]
fn test_concurrent_scans_of_separate_roots() {
    const FILES_PER_ROOT: usize = 2000;

    let tmp = tempdir().unwrap();
    let base = fs::canonicalize(tmp.path()).unwrap();
    let db_path = base.join("catalog.db");
    let roots: Vec<PathBuf> = ["left", "right"].iter().map(|n| base.join(n)).collect();
    for root in &roots {
        fs::create_dir_all(root).unwrap();
        for i in 0..FILES_PER_ROOT {
            fs::write(root.join(format!("file_{:04}.txt", i)), format!("content {}", i)).unwrap();
        }
    }
    // Creates the schema before the scanners race to open it.
    Catalog::open(&db_path).unwrap().close().unwrap();

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = roots
            .iter()
            .map(|root| {
                let db_path = &db_path;
                scope.spawn(move || {
                    let catalog = Catalog::open(db_path).unwrap();
                    Scanner::new(config_for(&[root.as_path()]))
                        .scan(&catalog, &SilentReporter)
                        .map(|summary| summary.files_recorded)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for result in results {
        assert_eq!(result.unwrap(), FILES_PER_ROOT as u64);
    }
    let catalog = Catalog::open(&db_path).unwrap();
    assert_eq!(catalog.latest_observations(None).unwrap().len(), 2 * FILES_PER_ROOT);
    for root in &roots {
        let under = catalog
            .latest_observations(Some(&root.to_string_lossy()))
            .unwrap();
        assert_eq!(under.len(), FILES_PER_ROOT);
    }
    let sessions = catalog.list_sessions().unwrap();
    assert_eq!(sessions.len(), 2);
    assert!(sessions.iter().all(|s| s.status == SessionStatus::Completed));
}

#[cfg(unix)]
mod unix {
    use super::*;
    use std::os::unix::fs::{symlink, PermissionsExt};

    fn set_mode(path: &Path, mode: u32) {
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
    }

    #[test]
    fn test_unreadable_file_is_skipped_with_warning() {
        let (_tmp, root) = canonical_root();
        let locked = root.join("folder_a/unique_a.txt");
        set_mode(&locked, 0o000);
        if fs::read(&locked).is_ok() {
            // Running with privileges that ignore permissions.
            set_mode(&locked, 0o644);
            return;
        }

        let catalog = Catalog::open_in_memory().unwrap();
        let summary = Scanner::new(config_for(&[&root]))
            .scan(&catalog, &SilentReporter)
            .unwrap();
        set_mode(&locked, 0o644);

        assert_eq!(summary.files_recorded, 5);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].path, locked);
        assert_eq!(catalog.list_sessions().unwrap()[0].files_failed, 1);

        // The remaining files still analyse as if the locked one never existed.
        let groups: Vec<Vec<String>> = find_duplicates(&catalog, None)
            .unwrap()
            .map(|g| g.unwrap().paths().map(str::to_string).collect())
            .collect();
        let mut expected = vec![
            vec![
                root.join("folder_a/shared.txt").to_string_lossy().into_owned(),
                root.join("folder_b/shared.txt").to_string_lossy().into_owned(),
            ],
            vec![
                root.join("folder_c/large_dup_1.bin").to_string_lossy().into_owned(),
                root.join("folder_c/large_dup_2.bin").to_string_lossy().into_owned(),
            ],
        ];
        let mut actual = groups;
        actual.sort();
        expected.sort();
        assert_eq!(actual, expected);

        let pairs = find_similar_directories(&catalog, &SimilarityOptions::default()).unwrap();
        let folder_a = root.join("folder_a").to_string_lossy().into_owned();
        let folder_b = root.join("folder_b").to_string_lossy().into_owned();
        assert_eq!(pairs.len(), 2);
        assert_eq!((pairs[0].source.as_str(), pairs[0].overlap), (folder_a.as_str(), 1.0));
        assert_eq!(pairs[0].target, folder_b);
        assert_eq!((pairs[1].source.as_str(), pairs[1].overlap), (folder_b.as_str(), 0.5));
    }

    #[test]
    fn test_unreadable_directory_keeps_previous_observations() {
        let (_tmp, root) = canonical_root();
        let catalog = Catalog::open_in_memory().unwrap();
        let scanner = Scanner::new(config_for(&[&root]));
        scanner.scan(&catalog, &SilentReporter).unwrap();

        let locked = root.join("folder_b");
        set_mode(&locked, 0o000);
        if fs::read_dir(&locked).is_ok() {
            set_mode(&locked, 0o755);
            return;
        }
        let summary = scanner.scan(&catalog, &SilentReporter).unwrap();
        set_mode(&locked, 0o755);

        assert!(!summary.failures.is_empty());
        assert_eq!(summary.files_vanished, 0);
        assert_eq!(catalog.latest_observations(None).unwrap().len(), 6);
    }

    #[test]
    fn test_symlinks_skipped_by_default() {
        let (_tmp, root) = canonical_root();
        symlink(
            root.join("folder_a/shared.txt"),
            root.join("folder_a/link.txt"),
        )
        .unwrap();
        let catalog = Catalog::open_in_memory().unwrap();

        let summary = Scanner::new(config_for(&[&root]))
            .scan(&catalog, &SilentReporter)
            .unwrap();
        assert_eq!(summary.files_recorded, 6);
        assert_eq!(summary.skipped_symlinks, 1);
    }

    #[test]
    fn test_dangling_symlink_is_a_failure_when_following() {
        let (_tmp, root) = canonical_root();
        symlink(root.join("nowhere"), root.join("folder_a/dangling")).unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        let mut config = config_for(&[&root]);
        config.scan.follow_symlinks = true;

        let summary = Scanner::new(config).scan(&catalog, &SilentReporter).unwrap();
        assert_eq!(summary.files_recorded, 6);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].path, root.join("folder_a/dangling"));
    }

    #[test]
    fn test_symlink_cycle_does_not_hang() {
        let (_tmp, root) = canonical_root();
        symlink(&root, root.join("folder_a/loop")).unwrap();
        let catalog = Catalog::open_in_memory().unwrap();
        let mut config = config_for(&[&root]);
        config.scan.follow_symlinks = true;

        let summary = Scanner::new(config).scan(&catalog, &SilentReporter).unwrap();
        assert_eq!(summary.files_recorded, 6);
        assert_eq!(summary.failures.len(), 1);
        assert!(summary.failures[0].reason.contains("cycle"));
    }
}
