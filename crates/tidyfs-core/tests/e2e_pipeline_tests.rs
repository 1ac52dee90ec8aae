use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

use tidyfs_core::config::RefreshPolicy;
use tidyfs_core::remediation::{ArchiveManifest, Archiver, ZipArchiver};
use tidyfs_core::storage::Database;
use tidyfs_core::{
    AppConfig, Error, OverlapEngine, RemediationError, RemediationRequest, SilentReporter,
};

/// Create a temp directory tree with two overlapping folders.
/// Layout:
///   root/
///     photos_2020/     beach_sunset.jpg, family_picnic.jpg, summer_vacation.png
///     photos_backup/   same three + extra_copy.png
///     taxes/           invoice_2021.pdf, receipt_march.pdf
fn create_test_tree(root: &Path) -> (PathBuf, PathBuf, PathBuf) {
    let photos = root.join("photos_2020");
    let backup = root.join("photos_backup");
    let taxes = root.join("taxes");
    for dir in [&photos, &backup, &taxes] {
        fs::create_dir_all(dir).unwrap();
    }
    for name in ["beach_sunset.jpg", "family_picnic.jpg", "summer_vacation.png"] {
        fs::write(photos.join(name), "original").unwrap();
        fs::write(backup.join(name), "copy").unwrap();
    }
    fs::write(backup.join("extra_copy.png"), "copy").unwrap();
    fs::write(taxes.join("invoice_2021.pdf"), "pdf").unwrap();
    fs::write(taxes.join("receipt_march.pdf"), "pdf").unwrap();
    (
        fs::canonicalize(photos).unwrap(),
        fs::canonicalize(backup).unwrap(),
        fs::canonicalize(taxes).unwrap(),
    )
}

fn test_config(state: &TempDir) -> AppConfig {
    AppConfig {
        insights_path: state.path().join("insights.json"),
        archive_dir: state.path().join("archives"),
        ..AppConfig::default()
    }
}

fn key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[test]
fn test_scan_then_insights() {
    let tmp = tempdir().unwrap();
    let (photos, backup, taxes) = create_test_tree(tmp.path());
    let state = tempdir().unwrap();
    let engine = OverlapEngine::open_in_memory(test_config(&state)).unwrap();

    for dir in [&photos, &backup, &taxes] {
        engine.scan(dir, &SilentReporter).unwrap();
    }
    assert!(engine.is_stale());
    assert_eq!(engine.indexed_paths().unwrap().len(), 3);

    let insights = engine.insights().unwrap();
    assert!(!engine.is_stale());
    assert_eq!(insights.len(), 1);
    assert_eq!(insights[0].path_a, key(&photos));
    assert_eq!(insights[0].path_b, key(&backup));
    // 9 shared occurrences, backup adds extra + copy + one more png
    assert_eq!(insights[0].similarity, 0.75);

    let terms = engine.terms_for(&backup).unwrap();
    assert_eq!(terms.get("png"), Some(&2));
    assert_eq!(terms.get("jpg"), Some(&2));
    assert!(!terms.contains_key("backup"));

    let holders = engine.paths_for("Invoice").unwrap();
    assert_eq!(holders, vec![(key(&taxes), 1)]);
}

#[test]
fn test_merge_updates_index_and_insights() {
    let tmp = tempdir().unwrap();
    let (photos, backup, taxes) = create_test_tree(tmp.path());
    let state = tempdir().unwrap();
    let engine = OverlapEngine::open_in_memory(test_config(&state)).unwrap();
    for dir in [&photos, &backup, &taxes] {
        engine.scan(dir, &SilentReporter).unwrap();
    }
    assert_eq!(engine.insights().unwrap().len(), 1);

    let result = engine
        .remediate_action(
            "merge",
            Some(key(&photos).as_str()),
            Some(key(&backup).as_str()),
        )
        .unwrap();
    assert!(result.is_success(), "{}", result.message());
    assert!(!backup.exists());
    assert_eq!(
        fs::read_to_string(photos.join("beach_sunset_1.jpg")).unwrap(),
        "copy"
    );

    assert_eq!(
        engine.indexed_paths().unwrap(),
        vec![key(&photos), key(&taxes)]
    );
    // Destination was rescanned with the moved entries
    let terms = engine.terms_for(&photos).unwrap();
    assert_eq!(terms.get("jpg"), Some(&4));
    assert_eq!(terms.get("extra"), Some(&1));
    assert!(engine.terms_for(&backup).unwrap().is_empty());

    assert!(engine.insights().unwrap().is_empty());
}

#[test]
fn test_archive_drops_path_from_index() {
    let tmp = tempdir().unwrap();
    let (photos, backup, taxes) = create_test_tree(tmp.path());
    let state = tempdir().unwrap();
    let engine = OverlapEngine::open_in_memory(test_config(&state)).unwrap();
    for dir in [&photos, &backup, &taxes] {
        engine.scan(dir, &SilentReporter).unwrap();
    }

    let result = engine
        .remediate_action(
            "archive",
            Some(key(&photos).as_str()),
            Some(key(&backup).as_str()),
        )
        .unwrap();
    assert!(result.is_success(), "{}", result.message());
    assert!(!backup.exists());
    assert!(photos.exists());
    assert!(result.archive_path.unwrap().starts_with(state.path().join("archives")));

    assert_eq!(
        engine.indexed_paths().unwrap(),
        vec![key(&photos), key(&taxes)]
    );
    assert!(engine.insights().unwrap().is_empty());
    assert!(engine.paths_for("extra").unwrap().is_empty());
}

#[test]
fn test_failed_remediation_leaves_index_alone() {
    let tmp = tempdir().unwrap();
    let (photos, _, _) = create_test_tree(tmp.path());
    let state = tempdir().unwrap();
    let engine = OverlapEngine::open_in_memory(test_config(&state)).unwrap();
    engine.scan(&photos, &SilentReporter).unwrap();

    let result = engine
        .remediate(RemediationRequest::merge(&photos, photos.join("missing")))
        .unwrap();
    assert!(!result.is_success());
    assert!(matches!(
        result.error,
        Some(RemediationError::InvalidOperands { .. })
    ));
    assert_eq!(engine.indexed_paths().unwrap(), vec![key(&photos)]);

    let unknown = engine.remediate_action("delete", Some("/a"), None);
    assert!(matches!(
        unknown,
        Err(Error::Remediation(RemediationError::InvalidOperands { .. }))
    ));
}

#[test]
fn test_insight_cache_survives_reopen() {
    let tmp = tempdir().unwrap();
    let (photos, backup, _) = create_test_tree(tmp.path());
    let state = tempdir().unwrap();
    let mut config = test_config(&state);
    config.similarity.refresh = RefreshPolicy::AfterUpsert;

    {
        let engine = OverlapEngine::open_in_memory(config.clone()).unwrap();
        engine.scan(&photos, &SilentReporter).unwrap();
        engine.scan(&backup, &SilentReporter).unwrap();
        assert!(!engine.is_stale());
    }
    assert!(state.path().join("insights.json").exists());

    let reopened = OverlapEngine::open_in_memory(config).unwrap();
    assert!(reopened.indexed_paths().unwrap().is_empty());
    let snapshot = reopened.snapshot().unwrap();
    assert!(snapshot.computed_at.is_some());
    assert_eq!(snapshot.insights.len(), 1);
    assert_eq!(reopened.insights().unwrap(), snapshot.insights);
}

#[test]
fn test_manual_policy_waits_for_refresh() {
    let tmp = tempdir().unwrap();
    let (photos, backup, _) = create_test_tree(tmp.path());
    let state = tempdir().unwrap();
    let mut config = test_config(&state);
    config.similarity.refresh = RefreshPolicy::Manual;
    let engine = OverlapEngine::open_in_memory(config).unwrap();

    engine.scan(&photos, &SilentReporter).unwrap();
    engine.scan(&backup, &SilentReporter).unwrap();
    assert!(engine.insights().unwrap().is_empty());
    assert!(engine.is_stale());

    let refreshed = engine.refresh_insights(&SilentReporter).unwrap();
    assert_eq!(refreshed.len(), 1);
    assert_eq!(engine.insights().unwrap(), refreshed);
}

#[test]
fn test_on_disk_index_reopens() {
    let tmp = tempdir().unwrap();
    let (photos, _, _) = create_test_tree(tmp.path());
    let state = tempdir().unwrap();
    let config = AppConfig {
        db_path: state.path().join("tidyfs.db"),
        ..test_config(&state)
    };

    {
        let engine = OverlapEngine::open(config.clone()).unwrap();
        engine.scan(&photos, &SilentReporter).unwrap();
    }
    let engine = OverlapEngine::open(config).unwrap();
    assert_eq!(engine.indexed_paths().unwrap(), vec![key(&photos)]);
    assert_eq!(engine.terms_for(&photos).unwrap().get("beach"), Some(&1));

    engine.truncate().unwrap();
    assert!(engine.indexed_paths().unwrap().is_empty());
    assert!(engine.insights().unwrap().is_empty());
}

#[test]
fn test_scan_rejects_missing_and_file_roots() {
    let tmp = tempdir().unwrap();
    let (photos, _, _) = create_test_tree(tmp.path());
    let state = tempdir().unwrap();
    let engine = OverlapEngine::open_in_memory(test_config(&state)).unwrap();

    let missing = engine.scan(&tmp.path().join("nope"), &SilentReporter);
    assert!(matches!(missing, Err(Error::Scan { .. })));

    let file = engine.scan(&photos.join("beach_sunset.jpg"), &SilentReporter);
    assert!(matches!(file, Err(Error::Scan { .. })));
    assert!(engine.indexed_paths().unwrap().is_empty());
}

#[test]
fn test_concurrent_remediations_on_disjoint_paths() {
    let tmp = tempdir().unwrap();
    let (photos, backup, taxes) = create_test_tree(tmp.path());
    let state = tempdir().unwrap();
    let engine = Arc::new(OverlapEngine::open_in_memory(test_config(&state)).unwrap());
    for dir in [&photos, &backup, &taxes] {
        engine.scan(dir, &SilentReporter).unwrap();
    }

    let merge = engine
        .spawn_remediation(RemediationRequest::merge(&photos, &backup))
        .unwrap();
    let archive = engine
        .spawn_remediation(RemediationRequest::archive(&taxes))
        .unwrap();

    assert!(merge.join().unwrap().unwrap().is_success());
    assert!(archive.join().unwrap().unwrap().is_success());
    assert_eq!(engine.indexed_paths().unwrap(), vec![key(&photos)]);
    assert!(engine.insights().unwrap().is_empty());
}

#[test]
fn test_list_directory_for_browsing() {
    let tmp = tempdir().unwrap();
    create_test_tree(tmp.path());
    fs::write(tmp.path().join("loose.txt"), "hello").unwrap();
    fs::write(tmp.path().join(".hidden"), "x").unwrap();
    let state = tempdir().unwrap();
    let engine = OverlapEngine::open_in_memory(test_config(&state)).unwrap();

    let entries = engine.list_directory(tmp.path()).unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["photos_2020", "photos_backup", "taxes", "loose.txt"]
    );
    assert!(entries[0].is_dir);
    assert_eq!(entries[3].size_bytes, Some(5));
}

#[test]
fn test_rescan_after_delete_drops_terms() {
    let tmp = tempdir().unwrap();
    let (_, _, taxes) = create_test_tree(tmp.path());
    let state = tempdir().unwrap();
    let engine = OverlapEngine::open_in_memory(test_config(&state)).unwrap();

    engine.scan(&taxes, &SilentReporter).unwrap();
    assert_eq!(engine.terms_for(&taxes).unwrap().get("pdf"), Some(&2));

    fs::remove_file(taxes.join("receipt_march.pdf")).unwrap();
    let summary = engine.scan(&taxes, &SilentReporter).unwrap();
    assert_eq!(summary.entries_seen, 1);

    let terms = engine.terms_for(&taxes).unwrap();
    assert_eq!(terms.get("pdf"), Some(&1));
    assert!(!terms.contains_key("receipt"));
    assert!(engine.paths_for("march").unwrap().is_empty());
}

/// Zip archiver that announces the start of a write and waits to be released.
struct GatedArchiver {
    started: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

impl Archiver for GatedArchiver {
    fn extension(&self) -> &str {
        "zip"
    }

    fn write(&self, source: &Path, dest: File) -> io::Result<ArchiveManifest> {
        self.started.lock().unwrap().send(()).unwrap();
        self.release.lock().unwrap().recv().unwrap();
        ZipArchiver.write(source, dest)
    }

    fn verify(&self, dest: &Path, manifest: &ArchiveManifest) -> io::Result<()> {
        ZipArchiver.verify(dest, manifest)
    }
}

/// Engine whose archive step blocks until the returned sender fires.
fn gated_engine(config: AppConfig) -> (Arc<OverlapEngine>, Receiver<()>, Sender<()>) {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let archiver = GatedArchiver {
        started: Mutex::new(started_tx),
        release: Mutex::new(release_rx),
    };
    let engine = OverlapEngine::open_in_memory(config)
        .unwrap()
        .with_archiver(Box::new(archiver));
    (Arc::new(engine), started_rx, release_tx)
}

#[test]
fn test_refresh_waits_for_running_remediation() {
    let tmp = tempdir().unwrap();
    let (photos, backup, _) = create_test_tree(tmp.path());
    let state = tempdir().unwrap();
    let mut config = test_config(&state);
    config.similarity.refresh = RefreshPolicy::Manual;
    let (engine, started, release) = gated_engine(config);
    engine.scan(&photos, &SilentReporter).unwrap();
    engine.scan(&backup, &SilentReporter).unwrap();

    let archive = engine
        .spawn_remediation(RemediationRequest::archive(&backup))
        .unwrap();
    started.recv().unwrap();

    let refresher = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || engine.refresh_insights(&SilentReporter))
    };
    thread::sleep(Duration::from_millis(100));
    assert!(!refresher.is_finished());

    release.send(()).unwrap();
    assert!(archive.join().unwrap().unwrap().is_success());

    // The pass ran against the reconciled index, so the archived pair is gone
    let insights = refresher.join().unwrap().unwrap();
    assert!(insights.is_empty());
    assert!(engine.snapshot().unwrap().insights.is_empty());
    assert_eq!(engine.indexed_paths().unwrap(), vec![key(&photos)]);
}

#[test]
fn test_listing_waits_for_running_remediation() {
    let tmp = tempdir().unwrap();
    let (_, backup, _) = create_test_tree(tmp.path());
    let state = tempdir().unwrap();
    let (engine, started, release) = gated_engine(test_config(&state));

    let archive = engine
        .spawn_remediation(RemediationRequest::archive(&backup))
        .unwrap();
    started.recv().unwrap();

    let lister = {
        let engine = Arc::clone(&engine);
        let backup = backup.clone();
        thread::spawn(move || engine.list_directory(&backup))
    };
    thread::sleep(Duration::from_millis(100));
    assert!(!lister.is_finished());

    release.send(()).unwrap();
    assert!(archive.join().unwrap().unwrap().is_success());
    assert!(matches!(lister.join().unwrap(), Err(Error::Scan { .. })));
}

#[test]
fn test_unreconciled_remediation_still_reports_result() {
    let tmp = tempdir().unwrap();
    let (photos, backup, _) = create_test_tree(tmp.path());
    let state = tempdir().unwrap();
    let db_path = state.path().join("tidyfs.db");
    let config = AppConfig {
        db_path: db_path.clone(),
        ..test_config(&state)
    };
    let engine = OverlapEngine::open(config).unwrap();
    engine.scan(&photos, &SilentReporter).unwrap();
    engine.scan(&backup, &SilentReporter).unwrap();

    let other = Database::open(&db_path).unwrap();
    other
        .connection()
        .execute_batch("DROP TABLE relationships; DROP TABLE paths;")
        .unwrap();

    match engine.remediate(RemediationRequest::archive(&backup)) {
        Err(Error::IndexOutOfSync { result, source }) => {
            assert!(result.is_success());
            assert_eq!(result.removed, vec![backup.clone()]);
            assert!(result.archive_path.unwrap().exists());
            assert!(matches!(*source, Error::Storage(_)));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(!backup.exists());
    assert!(engine.is_stale());
}
