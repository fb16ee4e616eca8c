// crates/quarry-store-sqlite/tests/recovery.rs
// ============================================================================
// Module: Recovery Tests
// Description: Corruption detection, backup material, deposit, and retrieve.
// Purpose: Validate that damaged databases are detected and salvaged.
// Dependencies: quarry-store-sqlite, quarry-core, tempfile
// ============================================================================

//! ## Overview
//! Recovery scenarios against real files on disk:
//! - A garbage header registers corruption and notifies observers once
//! - Integrity checks register and clear the corruption state
//! - Backups write material incrementally and honor the table filter
//! - Deposit sets the file set aside; retrieve rebuilds from generations
//! - A truncated file is partially recovered with monotonic progress
//! - Sparse and extreme rowids are reached without walking empty ranges
//! - Rows come back from the material dump when the schema page is lost

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::fs::OpenOptions;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use quarry_core::BackupFilter;
use quarry_core::CheckpointMode;
use quarry_core::CorruptionEvent;
use quarry_core::CorruptionObserver;
use quarry_core::ErrorCode;
use quarry_store_sqlite::Core;
use quarry_store_sqlite::Database;
use quarry_store_sqlite::EngineConfig;
use rusqlite::types::Value;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn open(core: &Arc<Core>, dir: &TempDir, name: &str) -> Database {
    Database::open_in(core, dir.path().join(name), EngineConfig::default()).unwrap()
}

fn payload(id: i64) -> String {
    format!("{id:06}").repeat(100)
}

fn seed(database: &Database, ids: std::ops::RangeInclusive<i64>) {
    database
        .execute("CREATE TABLE IF NOT EXISTS t (id INTEGER PRIMARY KEY, payload TEXT)")
        .unwrap();
    database
        .run_transaction(|handle| {
            for id in ids {
                handle.execute_with(
                    "INSERT INTO t (id, payload) VALUES (?1, ?2)",
                    &[Value::Integer(id), Value::Text(payload(id))],
                )?;
            }
            Ok(true)
        })
        .unwrap();
}

fn rows(database: &Database) -> Vec<(i64, String)> {
    database
        .query_rows("SELECT id, payload FROM t ORDER BY id", &[])
        .unwrap()
        .into_iter()
        .map(|row| match row.as_slice() {
            [Value::Integer(id), Value::Text(text)] => (*id, text.clone()),
            other => panic!("unexpected row {other:?}"),
        })
        .collect()
}

fn open_single_row_windows(core: &Arc<Core>, dir: &TempDir) -> Database {
    Database::open_in(
        core,
        dir.path().join("sparse.db"),
        EngineConfig { retrieve_window_rows: 1, ..EngineConfig::default() },
    )
    .unwrap()
}

fn insert(database: &Database, id: i64) {
    database
        .execute_with(
            "INSERT INTO t (id, payload) VALUES (?1, ?2)",
            &[Value::Integer(id), Value::Text(payload(id))],
        )
        .unwrap();
}

fn retrieve_within(database: &Database, limit: Duration) -> f64 {
    let (sender, receiver) = mpsc::channel();
    let worker = database.clone();
    thread::spawn(move || {
        let _ = sender.send(worker.retrieve(|_, _| {}));
    });
    receiver.recv_timeout(limit).expect("retrieve did not finish in time").unwrap()
}

fn counting_corruption_observer(counter: &Arc<AtomicUsize>) -> Arc<dyn CorruptionObserver> {
    let counter = Arc::clone(counter);
    Arc::new(move |_: &CorruptionEvent| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

fn assert_monotonic(progress: &[(f64, f64)]) {
    assert!(!progress.is_empty());
    let mut previous = 0.0;
    for (percentage, increment) in progress {
        assert!(*percentage > previous, "progress went backwards: {progress:?}");
        assert!(*increment > 0.0);
        assert!((percentage - previous - increment).abs() < 1e-9);
        previous = *percentage;
    }
    assert!((previous - 1.0).abs() < f64::EPSILON);
}

// ============================================================================
// SECTION: Corruption
// ============================================================================

#[test]
fn garbage_header_registers_corruption_once() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("garbage.db");
    fs::write(&path, vec![0xA5_u8; 8192]).unwrap();
    let database = Database::open_in(&core, &path, EngineConfig::default()).unwrap();
    let scoped = Arc::new(AtomicUsize::new(0));
    let global = Arc::new(AtomicUsize::new(0));
    database.set_notification_when_corrupted(Some(counting_corruption_observer(&scoped)));
    core.notifier().set_corruption_observer(Some(counting_corruption_observer(&global)));

    assert_eq!(database.handle().unwrap_err().code(), ErrorCode::Corrupted);
    assert_eq!(database.read_handle().unwrap_err().code(), ErrorCode::Corrupted);
    assert!(database.is_already_corrupted());
    assert!(!database.can_open());
    assert_eq!(scoped.load(Ordering::SeqCst), 1);
    assert_eq!(global.load(Ordering::SeqCst), 1);

    database.remove_files().unwrap();
    assert!(!database.is_already_corrupted());
    assert!(database.can_open());
}

#[test]
fn integrity_check_passes_on_healthy_database() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let database = open(&core, &dir, "a.db");
    seed(&database, 1 ..= 10);
    let report = database.check_integrity(false).unwrap();
    assert!(report.ok);
    assert!(!report.quick);
    assert!(report.details.is_empty());
    assert!(!database.check_if_corrupted().unwrap());
}

#[test]
fn retrieve_clears_corruption_of_unreadable_file() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("garbage.db");
    fs::write(&path, b"definitely not a database file, just bytes".repeat(200)).unwrap();
    let database = Database::open_in(&core, &path, EngineConfig::default()).unwrap();
    assert!(database.check_if_corrupted().unwrap());
    let fraction = database.retrieve(|_, _| {}).unwrap();
    assert!((fraction - 1.0).abs() < f64::EPSILON);
    assert!(!database.is_already_corrupted());
    assert!(database.contains_deposited());
    database.execute("CREATE TABLE fresh (x INTEGER)").unwrap();
}

// ============================================================================
// SECTION: Backup
// ============================================================================

#[test]
fn backup_rewrites_only_changed_tables() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let database = open(&core, &dir, "a.db");
    seed(&database, 1 ..= 5);
    database.execute("CREATE TABLE other (x INTEGER)").unwrap();
    database.execute("CREATE INDEX t_payload ON t (payload)").unwrap();

    let first = database.backup(false).unwrap();
    assert_eq!(first.tables_written, 2);
    assert_eq!(first.tables_unchanged, 0);
    assert!(database.paths().iter().any(|path| path.to_string_lossy().ends_with(".material")));

    let second = database.backup(false).unwrap();
    assert_eq!(second.tables_written, 0);
    assert_eq!(second.tables_unchanged, 2);

    database.execute("INSERT INTO other (x) VALUES (1)").unwrap();
    let third = database.backup(false).unwrap();
    assert_eq!(third.tables_written, 1);
    assert_eq!(third.tables_unchanged, 1);

    let forced = database.backup(true).unwrap();
    assert_eq!(forced.tables_written, 2);
}

#[test]
fn backup_filter_excludes_tables() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let database = open(&core, &dir, "a.db");
    seed(&database, 1 ..= 5);
    database.execute("CREATE TABLE scratch (x INTEGER)").unwrap();
    let filter: Arc<dyn BackupFilter> = Arc::new(|table: &str| table != "scratch");
    database.filter_backup(Some(filter));
    let report = database.backup(true).unwrap();
    assert_eq!(report.tables_written, 1);
    assert_eq!(report.tables_filtered, 1);
}

#[test]
fn backup_fails_while_blockaded() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let database = Database::open_in(
        &core,
        dir.path().join("a.db"),
        EngineConfig { blockade_drain_timeout_ms: 100, ..EngineConfig::default() },
    )
    .unwrap();
    seed(&database, 1 ..= 2);
    let guard = database.blockade().unwrap();
    assert_eq!(database.backup(false).unwrap_err().code(), ErrorCode::Busy);
    assert_eq!(database.threaded_error().map(|err| err.code()), Some(ErrorCode::Busy));
    drop(guard);
    database.clear_threaded_error();
    assert!(database.threaded_error().is_none());
    assert!(database.backup(false).is_ok());
}

// ============================================================================
// SECTION: Deposit and Retrieve
// ============================================================================

#[test]
fn deposit_sets_files_aside_and_starts_fresh() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let database = open(&core, &dir, "a.db");
    assert!(!database.contains_deposited());
    assert!(!database.deposit().unwrap());

    seed(&database, 1 ..= 10);
    database.backup(true).unwrap();
    assert!(database.deposit().unwrap());
    assert!(database.contains_deposited());
    assert!(!database.handle().unwrap().table_exists("t").unwrap());

    database.remove_deposited().unwrap();
    assert!(!database.contains_deposited());
}

#[test]
fn retrieve_merges_every_generation() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let database = open(&core, &dir, "a.db");
    seed(&database, 1 ..= 10);
    database.backup(true).unwrap();
    assert!(database.deposit().unwrap());
    seed(&database, 11 ..= 15);

    let mut progress = Vec::new();
    let fraction = database
        .retrieve(|percentage, increment| progress.push((percentage, increment)))
        .unwrap();
    assert!((fraction - 1.0).abs() < f64::EPSILON);
    assert_monotonic(&progress);
    assert!(progress.len() >= 2);

    let recovered = rows(&database);
    assert_eq!(recovered.len(), 15);
    for (id, text) in &recovered {
        assert_eq!(*text, payload(*id));
    }
}

#[test]
fn retrieve_salvages_truncated_database() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("truncated.db");
    let database = Database::open_in(&core, &path, EngineConfig::default()).unwrap();
    seed(&database, 1 ..= 400);
    database.backup(true).unwrap();
    database.checkpoint(CheckpointMode::Truncate).unwrap();
    database.close(|| {}).unwrap();

    let length = fs::metadata(&path).unwrap().len();
    OpenOptions::new().write(true).open(&path).unwrap().set_len(length / 2).unwrap();

    let mut progress = Vec::new();
    let fraction = database
        .retrieve(|percentage, increment| progress.push((percentage, increment)))
        .unwrap();
    assert!(fraction > 0.0 && fraction < 1.0, "fraction {fraction}");
    assert_monotonic(&progress);

    let recovered = rows(&database);
    assert!(!recovered.is_empty());
    assert!(recovered.len() < 400);
    for (id, text) in &recovered {
        assert!((1 ..= 400).contains(id));
        assert_eq!(*text, payload(*id));
    }
    assert!(database.check_integrity(true).unwrap().ok);
    assert!(database.contains_deposited());
}

#[test]
fn retrieve_reaches_sparse_rowids() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let database = open_single_row_windows(&core, &dir);
    seed(&database, 1 ..= 1);
    insert(&database, 1_700_000_000_000);

    let fraction = retrieve_within(&database, Duration::from_secs(30));
    assert!((fraction - 1.0).abs() < f64::EPSILON);
    let ids: Vec<i64> = rows(&database).into_iter().map(|(id, _)| id).collect();
    assert_eq!(ids, vec![1, 1_700_000_000_000]);
}

#[test]
fn retrieve_reads_the_largest_rowid() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let database = open_single_row_windows(&core, &dir);
    seed(&database, 5 ..= 5);
    insert(&database, i64::MAX);

    let fraction = retrieve_within(&database, Duration::from_secs(30));
    assert!((fraction - 1.0).abs() < f64::EPSILON);
    let recovered = rows(&database);
    assert_eq!(recovered, vec![(5, payload(5)), (i64::MAX, payload(i64::MAX))]);
}

#[test]
fn retrieve_replays_rows_when_the_schema_page_is_lost() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("schema.db");
    let database = Database::open_in(&core, &path, EngineConfig::default()).unwrap();
    seed(&database, 1 ..= 400);
    database.backup(true).unwrap();
    database.checkpoint(CheckpointMode::Truncate).unwrap();
    database.close(|| {}).unwrap();

    let mut file = OpenOptions::new().write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(100)).unwrap();
    file.write_all(&[0_u8; 3996]).unwrap();
    file.sync_all().unwrap();
    drop(file);

    let fraction = database.retrieve(|_, _| {}).unwrap();
    assert!((fraction - 1.0).abs() < f64::EPSILON, "fraction {fraction}");
    let recovered = rows(&database);
    assert_eq!(recovered.len(), 400);
    for (id, text) in &recovered {
        assert_eq!(*text, payload(*id));
    }
    assert!(database.check_integrity(true).unwrap().ok);
}

// ============================================================================
// SECTION: Files
// ============================================================================

#[test]
fn file_operations_cover_the_whole_file_set() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let database = open(&core, &dir, "a.db");
    seed(&database, 1 ..= 20);
    database.backup(true).unwrap();

    let paths = database.paths();
    assert_eq!(paths.len(), 6);
    assert_eq!(paths[0], database.path());
    assert!(database.files_size().unwrap() > 0);

    let archive = dir.path().join("archive");
    database.move_files(&archive).unwrap();
    assert!(!database.path().exists());
    assert!(archive.join("a.db").exists());
    assert!(archive.join("a.db.material").exists());

    seed(&database, 1 ..= 1);
    database.remove_files().unwrap();
    assert!(!database.path().exists());
    assert_eq!(database.files_size().unwrap(), 0);
}
