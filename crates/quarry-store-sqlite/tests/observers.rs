// crates/quarry-store-sqlite/tests/observers.rs
// ============================================================================
// Module: Observer and Checkpoint Tests
// Description: Statement traces, error routing, and WAL checkpoints.
// Purpose: Validate that engine events reach the scoped observers.
// Dependencies: quarry-store-sqlite, quarry-core, tempfile
// ============================================================================

//! ## Overview
//! - SQL and performance traces reach database and global observers
//! - Errors reach the global observer and the observer of their path only
//! - Clearing an observer stops delivery
//! - Passive checkpoints never wait; truncating checkpoints report readers

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

use std::sync::Arc;
use std::sync::Mutex;

use quarry_core::CheckpointMode;
use quarry_core::ErrorCode;
use quarry_core::ErrorObserver;
use quarry_core::PerformanceObserver;
use quarry_core::PerformanceTrace;
use quarry_core::QuarryError;
use quarry_core::SqlObserver;
use quarry_core::SqlTrace;
use quarry_store_sqlite::Core;
use quarry_store_sqlite::Database;
use quarry_store_sqlite::EngineConfig;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn open(core: &Arc<Core>, dir: &TempDir, name: &str) -> Database {
    Database::open_in(core, dir.path().join(name), EngineConfig::default()).unwrap()
}

fn sql_recorder(sink: &Arc<Mutex<Vec<SqlTrace>>>) -> Arc<dyn SqlObserver> {
    let sink = Arc::clone(sink);
    Arc::new(move |trace: &SqlTrace| sink.lock().unwrap().push(trace.clone()))
}

fn error_recorder(sink: &Arc<Mutex<Vec<QuarryError>>>) -> Arc<dyn ErrorObserver> {
    let sink = Arc::clone(sink);
    Arc::new(move |error: &QuarryError| sink.lock().unwrap().push(error.clone()))
}

// ============================================================================
// SECTION: Traces
// ============================================================================

#[test]
fn sql_traces_reach_database_and_global_observers() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let database = open(&core, &dir, "a.db");
    database.set_tag(42);
    let scoped = Arc::new(Mutex::new(Vec::new()));
    let global = Arc::new(Mutex::new(Vec::new()));
    database.set_sql_observer(Some(sql_recorder(&scoped)));
    core.notifier().set_sql_observer(Some(sql_recorder(&global)));

    database.execute("CREATE TABLE t (x INTEGER)").unwrap();

    let scoped_traces = scoped.lock().unwrap().clone();
    assert_eq!(scoped_traces.len(), 1);
    assert_eq!(scoped_traces[0].sql, "CREATE TABLE t (x INTEGER)");
    assert_eq!(scoped_traces[0].tag, 42);
    assert_eq!(scoped_traces[0].path, database.path().to_string_lossy());
    assert_eq!(*global.lock().unwrap(), scoped_traces);

    database.set_sql_observer(None);
    database.execute("INSERT INTO t (x) VALUES (1)").unwrap();
    assert_eq!(scoped.lock().unwrap().len(), 1);
    assert_eq!(global.lock().unwrap().len(), 2);
}

#[test]
fn performance_traces_carry_statement_and_handle() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let database = open(&core, &dir, "a.db");
    let traces = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&traces);
    let observer: Arc<dyn PerformanceObserver> =
        Arc::new(move |trace: &PerformanceTrace| sink.lock().unwrap().push(trace.clone()));
    database.set_performance_observer(Some(observer));

    let mut handle = database.handle().unwrap();
    handle.execute("CREATE TABLE t (x INTEGER)").unwrap();
    let handle_id = handle.id();
    drop(handle);

    let traces = traces.lock().unwrap().clone();
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].handle_id, handle_id);
    assert_eq!(traces[0].sql, "CREATE TABLE t (x INTEGER)");
}

// ============================================================================
// SECTION: Errors
// ============================================================================

#[test]
fn errors_are_routed_by_path() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let first = open(&core, &dir, "first.db");
    let second = open(&core, &dir, "second.db");
    let first_errors = Arc::new(Mutex::new(Vec::new()));
    let second_errors = Arc::new(Mutex::new(Vec::new()));
    let global_errors = Arc::new(Mutex::new(Vec::new()));
    first.set_error_observer(Some(error_recorder(&first_errors)));
    second.set_error_observer(Some(error_recorder(&second_errors)));
    core.notifier().set_error_observer(Some(error_recorder(&global_errors)));
    first.set_tag(7);

    let err = first.execute("SELECT * FROM missing").unwrap_err();
    assert_eq!(err.code(), ErrorCode::Sql);

    let first_errors = first_errors.lock().unwrap().clone();
    assert_eq!(first_errors.len(), 1);
    assert_eq!(first_errors[0].path(), Some(first.path().to_string_lossy().as_ref()));
    assert_eq!(first_errors[0].sql_text(), Some("SELECT * FROM missing"));
    assert!(second_errors.lock().unwrap().is_empty());
    assert_eq!(global_errors.lock().unwrap().len(), 1);
    assert_eq!(err.path(), first_errors[0].path());
}

#[test]
fn busy_errors_are_reported_too() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let database = open(&core, &dir, "a.db");
    let errors = Arc::new(Mutex::new(Vec::new()));
    database.set_error_observer(Some(error_recorder(&errors)));
    let guard = database.blockade().unwrap();
    assert!(database.handle().is_err());
    drop(guard);
    let errors = errors.lock().unwrap().clone();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code(), ErrorCode::Busy);
}

// ============================================================================
// SECTION: Checkpoints
// ============================================================================

#[test]
fn passive_checkpoint_reports_frames() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let database = open(&core, &dir, "a.db");
    database.execute("CREATE TABLE t (x INTEGER)").unwrap();
    database.execute("INSERT INTO t (x) VALUES (1)").unwrap();
    let report = database.checkpoint(CheckpointMode::Passive).unwrap();
    assert_eq!(report.mode, CheckpointMode::Passive);
    assert!(report.log_frames > 0);
    assert!(report.checkpointed_frames <= report.log_frames);
}

#[test]
fn passive_checkpoint_does_not_wait_for_writer() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let database = open(&core, &dir, "a.db");
    let writer = database.handle().unwrap();
    let err = database.checkpoint(CheckpointMode::Passive).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Busy);
    drop(writer);
    assert!(database.checkpoint(CheckpointMode::Passive).is_ok());
}

#[test]
fn truncate_checkpoint_fails_behind_open_reader() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let database = Database::open_in(
        &core,
        dir.path().join("a.db"),
        EngineConfig { busy_timeout_ms: 50, ..EngineConfig::default() },
    )
    .unwrap();
    database.execute("CREATE TABLE t (x INTEGER)").unwrap();
    let mut reader = database.read_handle().unwrap();
    reader.begin_transaction().unwrap();
    assert_eq!(reader.query_i64("SELECT count(*) FROM t", &[]).unwrap(), Some(0));
    database.execute("INSERT INTO t (x) VALUES (1)").unwrap();

    let err = database.checkpoint(CheckpointMode::Truncate).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Busy);

    reader.commit_or_rollback_transaction().unwrap();
    drop(reader);
    let report = database.checkpoint(CheckpointMode::Truncate).unwrap();
    assert_eq!(report.mode, CheckpointMode::Truncate);
}
