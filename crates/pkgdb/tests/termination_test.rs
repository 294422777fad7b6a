//! Termination controller tests: deferred cleanup at check points

use pkgdb::prelude::*;
use pkgdb::rebuild;
use tempfile::TempDir;

fn test_config(dir: &TempDir) -> DbConfig {
    DbConfig::new(dir.path())
        .with_mode(OpenMode::create())
        .with_map_size(32 * 1024 * 1024)
        .with_sync_mode(SyncMode::NoSync)
        .with_terminate_action(TerminateAction::Error)
}

fn create_test_db(controller: &TerminationController) -> (Database, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let db = Database::open_with_controller(test_config(&temp_dir), controller).unwrap();
    for name in ["a", "b", "c"] {
        db.add(&Header::new().with_string(Tag::Name, name)).unwrap();
    }
    (db, temp_dir)
}

#[test]
fn test_request_stops_match_iterator_at_next_advance() {
    let controller = TerminationController::new();
    let (db, _temp) = create_test_db(&controller);

    let mut iter = db.match_iter(Tag::Packages, None).unwrap();
    assert!(iter.next_header().unwrap().is_some());

    controller.request();
    assert!(!db.is_terminated());
    assert!(matches!(iter.next_header(), Err(PkgdbError::Terminated)));
    assert!(db.is_terminated());
}

#[test]
fn test_request_stops_key_iterator() {
    let controller = TerminationController::new();
    let (db, _temp) = create_test_db(&controller);

    let mut keys = db.key_iter(Tag::Name).unwrap();
    assert!(keys.advance().unwrap());
    controller.request();
    assert!(matches!(keys.advance(), Err(PkgdbError::Terminated)));
}

#[test]
fn test_terminated_handle_refuses_work() {
    let controller = TerminationController::new();
    let (db, _temp) = create_test_db(&controller);

    assert!(controller.check_terminate(true));
    assert!(db.is_terminated());
    assert!(matches!(
        db.add(&Header::new().with_string(Tag::Name, "d")),
        Err(PkgdbError::Terminated)
    ));
    assert!(matches!(db.match_iter(Tag::Packages, None), Err(PkgdbError::Terminated)));
    assert!(matches!(db.sync(), Err(PkgdbError::Terminated)));
    // Closing after termination is still safe
    db.close().unwrap();
}

#[test]
fn test_check_terminate_without_request() {
    let controller = TerminationController::new();
    let (db, _temp) = create_test_db(&controller);

    assert!(!controller.check_terminate(false));
    assert!(!db.is_terminated());
    assert_eq!(controller.tracked_count(), 1);
}

#[test]
fn test_controllers_are_independent() {
    let first = TerminationController::new();
    let second = TerminationController::new();
    let (db_a, _ta) = create_test_db(&first);
    let (db_b, _tb) = create_test_db(&second);

    first.request();
    first.check_terminate(false);
    assert!(db_a.is_terminated());
    assert!(!db_b.is_terminated());
    assert_eq!(db_b.count_packages("a").unwrap(), 1);
}

#[test]
fn test_pending_rewrite_flushed_before_check_point() {
    let controller = TerminationController::new();
    let (db, temp) = create_test_db(&controller);

    let mut iter = db.match_iter(Tag::Name, Some(b"a")).unwrap();
    iter.set_rewrite(true);
    iter.next_header().unwrap().unwrap();
    iter.header_mut()
        .unwrap()
        .set(Tag::Summary, TagValue::String("kept".into()));
    iter.set_modified(true);

    controller.request();
    assert!(matches!(iter.next_header(), Err(PkgdbError::Terminated)));
    drop(iter);
    db.close().unwrap();

    let reopened =
        Database::open_with_controller(test_config(&temp), &TerminationController::new()).unwrap();
    let header = reopened.get(1).unwrap().unwrap();
    assert_eq!(header.get_string(Tag::Summary), Some("kept"));
}

#[test]
fn test_termination_aborts_rebuild_cleanly() {
    let (db, temp) = create_test_db(&TerminationController::new());
    db.close().unwrap();
    let config = test_config(&temp);
    let bytes_before = std::fs::read(config.data_file()).unwrap();

    let controller = TerminationController::new();
    controller.request();
    let err = rebuild(&config, None, &controller).unwrap_err();
    assert!(matches!(err, PkgdbError::Terminated));
    assert_ne!(err.status(), 0);

    assert_eq!(std::fs::read(config.data_file()).unwrap(), bytes_before);
    let shadow = pkgdb::rebuild::shadow_path(&config.data_file());
    assert!(!shadow.exists());
}
