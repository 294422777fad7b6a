//! Rebuild engine tests: idempotence, atomicity, index re-derivation

use pkgdb::prelude::*;
use pkgdb::rebuild;
use std::collections::BTreeMap;
use std::path::Path;
use tempfile::TempDir;

fn test_config(dir: &TempDir) -> DbConfig {
    DbConfig::new(dir.path())
        .with_mode(OpenMode::create())
        .with_map_size(32 * 1024 * 1024)
        .with_sync_mode(SyncMode::NoSync)
        .with_rebuild_batch_size(2)
        .with_terminate_action(TerminateAction::Error)
}

fn open(config: &DbConfig) -> Database {
    Database::open_with_controller(config.clone(), &TerminationController::new()).unwrap()
}

fn package(name: &str, files: &[&str]) -> Header {
    Header::new()
        .with_string(Tag::Name, name)
        .with_string(Tag::Version, "1.0")
        .with_string(Tag::Release, "1")
        .with_strings(Tag::Basenames, files.iter().copied())
        .with_strings(Tag::Providename, [name])
}

/// Populate a database, leaving a gap in the instance numbers.
fn populated() -> (DbConfig, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(&temp_dir);
    let db = open(&config);
    db.add(&package("bash", &["bash", "bashbug"])).unwrap();
    let gone = db.add(&package("tcsh", &["tcsh"])).unwrap();
    db.add(&package("zsh", &["zsh"])).unwrap();
    db.add(&package("dash", &["dash"])).unwrap();
    db.add(&package("bash", &["bash"])).unwrap();
    db.remove(gone).unwrap();
    db.close().unwrap();
    (config, temp_dir)
}

fn snapshot(config: &DbConfig) -> BTreeMap<InstanceNumber, Header> {
    let db = open(config);
    let mut iter = db.match_iter(Tag::Packages, None).unwrap();
    let mut out = BTreeMap::new();
    while let Some(header) = iter.next_header().unwrap() {
        let header = header.clone();
        out.insert(iter.offset(), header);
    }
    iter.free().unwrap();
    db.close().unwrap();
    out
}

fn index_membership(config: &DbConfig, tag: Tag) -> Vec<(Vec<u8>, Vec<(InstanceNumber, u32)>)> {
    let db = open(config);
    let mut keys = db.key_iter(tag).unwrap();
    let mut out = Vec::new();
    while keys.advance().unwrap() {
        let key = keys.key().unwrap().to_vec();
        let mut iter = db.match_iter(tag, Some(&key)).unwrap();
        let mut hits = Vec::new();
        while iter.next_header().unwrap().is_some() {
            hits.push((iter.offset(), iter.file_num()));
        }
        iter.free().unwrap();
        out.push((key, hits));
    }
    keys.free();
    db.close().unwrap();
    out
}

fn leftover_shadows(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.contains(".rebuild-"))
        .collect()
}

#[test]
fn test_rebuild_preserves_records_and_indexes() {
    let (config, _temp) = populated();
    let before = snapshot(&config);
    let names_before = index_membership(&config, Tag::Name);
    let files_before = index_membership(&config, Tag::Basenames);

    let report = rebuild(&config, None, &TerminationController::new()).unwrap();
    assert_eq!(report.records, 4);
    assert_eq!(report.next_instance, 6);
    // Five cursor steps (four headers, then the end), four header reads, one counter read
    assert_eq!(report.gets.count, 10);

    assert_eq!(snapshot(&config), before);
    assert_eq!(index_membership(&config, Tag::Name), names_before);
    assert_eq!(index_membership(&config, Tag::Basenames), files_before);
    assert!(leftover_shadows(&config.db_dir()).is_empty());
}

#[test]
fn test_rebuild_keeps_instance_counter() {
    let (config, _temp) = populated();
    rebuild(&config, None, &TerminationController::new()).unwrap();

    let db = open(&config);
    assert_eq!(db.add(&package("fish", &["fish"])).unwrap(), 6);
    db.close().unwrap();
}

#[test]
fn test_rebuilt_database_verifies() {
    let (config, _temp) = populated();
    rebuild(&config, None, &TerminationController::new()).unwrap();

    let report = Database::verify(&config).unwrap();
    assert_eq!(report.records, 4);
    assert_eq!(report.dangling, 0);
    assert_eq!(report.index_entries.get("Basenames"), Some(&5));
}

#[test]
fn test_rejected_record_leaves_database_untouched() {
    let (config, _temp) = populated();
    let data_file = config.data_file();
    let bytes_before = std::fs::read(&data_file).unwrap();
    let before = snapshot(&config);

    let reject_zsh = |blob: &[u8]| match Header::from_blob(blob) {
        Ok(h) if h.get_string(Tag::Name) == Some("zsh") => Verdict::Reject("bad signature".into()),
        Ok(_) => Verdict::Accept,
        Err(e) => Verdict::Reject(e.to_string()),
    };

    let err = rebuild(&config, Some(&reject_zsh), &TerminationController::new()).unwrap_err();
    match err {
        PkgdbError::Integrity { offset, message } => {
            assert_eq!(offset, 3);
            assert_eq!(message, "bad signature");
        }
        other => panic!("expected integrity error, got {other:?}"),
    }

    assert_eq!(std::fs::read(&data_file).unwrap(), bytes_before);
    assert_eq!(snapshot(&config), before);
    assert!(leftover_shadows(&config.db_dir()).is_empty());
}

#[test]
fn test_rebuild_rederives_index_from_headers() {
    let (config, _temp) = populated();

    // Rename dash in place: the rewrite touches only the primary store
    let db = open(&config);
    let mut iter = db.match_iter(Tag::Name, Some(b"dash")).unwrap();
    iter.set_rewrite(true);
    iter.next_header().unwrap().unwrap();
    iter.header_mut()
        .unwrap()
        .set(Tag::Name, TagValue::String("ash".into()));
    iter.set_modified(true);
    iter.free().unwrap();
    assert_eq!(db.count_packages("ash").unwrap(), 0);
    db.close().unwrap();

    rebuild(&config, None, &TerminationController::new()).unwrap();

    let db = open(&config);
    assert_eq!(db.count_packages("ash").unwrap(), 1);
    let mut stale = db.match_iter(Tag::Name, Some(b"dash")).unwrap();
    assert_eq!(stale.count(), 0);
    stale.free().unwrap();
    db.close().unwrap();
}

#[test]
fn test_rebuild_of_empty_database() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(&temp_dir);
    Database::init(&config).unwrap();

    let report = rebuild(&config, None, &TerminationController::new()).unwrap();
    assert_eq!(report.records, 0);
    assert_eq!(report.next_instance, 1);
    assert_eq!(snapshot(&config).len(), 0);
}

#[test]
fn test_rebuild_missing_database() {
    let temp_dir = tempfile::tempdir().unwrap();
    let err = rebuild(&test_config(&temp_dir), None, &TerminationController::new()).unwrap_err();
    assert!(matches!(err, PkgdbError::NotFound(_)));
}

#[test]
fn test_stale_shadow_is_replaced() {
    let (config, _temp) = populated();
    let shadow = pkgdb::rebuild::shadow_path(&config.data_file());
    std::fs::write(&shadow, b"leftover from a crashed rebuild").unwrap();

    let report = rebuild(&config, None, &TerminationController::new()).unwrap();
    assert_eq!(report.records, 4);
    assert!(!shadow.exists());
}

#[test]
fn test_report_serializes() {
    let (config, _temp) = populated();
    let report = rebuild(&config, None, &TerminationController::new()).unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["records"], 4);
    assert_eq!(json["next_instance"], 6);
}
