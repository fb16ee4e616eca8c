// crates/quarry-store-sqlite/tests/pool.rs
// ============================================================================
// Module: Handle Pool Tests
// Description: Writer exclusivity, reader caps, blockades, and handle configs.
// Purpose: Validate the concurrency contract of the handle pool.
// Dependencies: quarry-store-sqlite, quarry-core, proptest, tempfile
// ============================================================================

//! ## Overview
//! Exercises the pool from several threads:
//! - At most one write handle is ever issued
//! - Read handles are capped and `try_acquire` fails fast with `Busy`
//! - Blockades refuse acquisitions, drain issued handles, and are exclusive
//! - Handle configs run in priority order on every new connection
//! - One path resolves to one shared database state

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

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use proptest::prelude::*;
use quarry_core::ErrorCode;
use quarry_core::Operation;
use quarry_core::OperationEvent;
use quarry_core::QuarryError;
use quarry_store_sqlite::Core;
use quarry_store_sqlite::Database;
use quarry_store_sqlite::EngineConfig;
use quarry_store_sqlite::HandleConfig;
use quarry_store_sqlite::HandleKind;
use quarry_store_sqlite::InnerHandle;
use quarry_store_sqlite::Priority;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn quick_config() -> EngineConfig {
    EngineConfig {
        acquire_timeout_ms: 200,
        blockade_drain_timeout_ms: 200,
        ..EngineConfig::default()
    }
}

fn open(core: &Arc<Core>, dir: &TempDir, name: &str) -> Database {
    Database::open_in(core, dir.path().join(name), quick_config()).unwrap()
}

fn db_path(dir: &TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

fn hammer_writer(database: &Database, threads: usize, rounds: usize) -> usize {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let workers: Vec<_> = (0 .. threads)
        .map(|_| {
            let database = database.clone();
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            thread::spawn(move || {
                for _ in 0 .. rounds {
                    let mut handle = loop {
                        match database.handle() {
                            Ok(handle) => break handle,
                            Err(err) if err.code() == ErrorCode::Busy => {}
                            Err(err) => panic!("unexpected acquire failure: {err}"),
                        }
                    };
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    handle.execute("INSERT INTO hits (n) VALUES (1)").unwrap();
                    active.fetch_sub(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    peak.load(Ordering::SeqCst)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(6))]

    #[test]
    fn concurrent_writers_never_overlap(threads in 2_usize .. 6, rounds in 1_usize .. 8) {
        let core = Core::new();
        let dir = TempDir::new().unwrap();
        let database = Database::open_in(
            &core,
            db_path(&dir, "writers.db"),
            EngineConfig { acquire_timeout_ms: 5_000, ..EngineConfig::default() },
        )
        .unwrap();
        database.execute("CREATE TABLE hits (n INTEGER)").unwrap();
        let peak = hammer_writer(&database, threads, rounds);
        prop_assert_eq!(peak, 1);
        let total = database.query_i64("SELECT count(*) FROM hits", &[]).unwrap();
        prop_assert_eq!(total, Some(i64::try_from(threads * rounds).unwrap()));
    }
}

#[test]
fn second_writer_waits_then_times_out() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let database = open(&core, &dir, "a.db");
    let writer = database.handle().unwrap();
    let err = database.try_acquire(HandleKind::Write).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Busy);
    let err = database.handle().unwrap_err();
    assert_eq!(err.code(), ErrorCode::Busy);
    drop(writer);
    assert!(database.try_acquire(HandleKind::Write).is_ok());
}

#[test]
fn waiting_writer_gets_released_handle() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let database = Database::open_in(
        &core,
        db_path(&dir, "a.db"),
        EngineConfig { acquire_timeout_ms: 5_000, ..EngineConfig::default() },
    )
    .unwrap();
    let writer = database.handle().unwrap();
    let first_id = writer.id();
    let waiter = {
        let database = database.clone();
        thread::spawn(move || database.handle().map(|handle| handle.id()))
    };
    thread::sleep(Duration::from_millis(50));
    drop(writer);
    assert_eq!(waiter.join().unwrap().unwrap(), first_id);
}

#[test]
fn readers_are_capped() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let database = Database::open_in(
        &core,
        db_path(&dir, "a.db"),
        EngineConfig { max_readers: 2, ..quick_config() },
    )
    .unwrap();
    database.execute("CREATE TABLE t (x INTEGER)").unwrap();
    let first = database.read_handle().unwrap();
    let second = database.read_handle().unwrap();
    assert!(first.is_read_only());
    assert_ne!(first.id(), second.id());
    let err = database.try_acquire(HandleKind::Read).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Busy);
    let writer = database.handle().unwrap();
    assert!(!writer.is_read_only());
    drop(first);
    assert!(database.try_acquire(HandleKind::Read).is_ok());
    drop(second);
    drop(writer);
}

#[test]
fn read_handles_refuse_writes() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let database = open(&core, &dir, "a.db");
    database.execute("CREATE TABLE t (x INTEGER)").unwrap();
    let mut reader = database.read_handle().unwrap();
    let err = reader.execute("INSERT INTO t (x) VALUES (1)").unwrap_err();
    assert_ne!(err.code(), ErrorCode::Busy);
    assert_eq!(reader.last_error().map(QuarryError::code), Some(err.code()));
}

#[test]
fn released_handles_are_reused() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let database = open(&core, &dir, "a.db");
    let first = database.handle().unwrap().id();
    let second = database.handle().unwrap().id();
    assert_eq!(first, second);
    assert!(database.is_opened());
    assert_eq!(database.purge(), 1);
    assert!(!database.is_opened());
    assert_ne!(database.handle().unwrap().id(), first);
}

#[test]
fn blockade_refuses_new_handles() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let database = open(&core, &dir, "a.db");
    let guard = database.blockade().unwrap();
    assert!(database.is_blockaded());
    assert!(guard.guards(&database));
    assert_eq!(database.handle().unwrap_err().code(), ErrorCode::Busy);
    assert_eq!(database.read_handle().unwrap_err().code(), ErrorCode::Busy);
    assert_eq!(database.blockade().unwrap_err().code(), ErrorCode::Busy);
    let mut owned = guard.handle(HandleKind::Write).unwrap();
    owned.execute("CREATE TABLE t (x INTEGER)").unwrap();
    drop(owned);
    drop(guard);
    assert!(!database.is_blockaded());
    assert!(database.handle().is_ok());
}

#[test]
fn blockade_waits_for_issued_handles() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let database = Database::open_in(
        &core,
        db_path(&dir, "a.db"),
        EngineConfig { blockade_drain_timeout_ms: 5_000, ..quick_config() },
    )
    .unwrap();
    let reader = database.read_handle().unwrap();
    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        drop(reader);
    });
    let guard = database.blockade().unwrap();
    releaser.join().unwrap();
    assert!(guard.guards(&database));
}

#[test]
fn blockade_times_out_while_handles_are_held() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let database = open(&core, &dir, "a.db");
    let writer = database.handle().unwrap();
    assert_eq!(database.blockade().unwrap_err().code(), ErrorCode::Busy);
    assert!(!database.is_blockaded());
    drop(writer);
    assert!(database.blockade().is_ok());
}

#[test]
fn close_runs_callback_with_connections_closed() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let database = open(&core, &dir, "a.db");
    database.execute("CREATE TABLE t (x INTEGER)").unwrap();
    assert!(database.is_opened());
    let observed = Arc::new(Mutex::new(None));
    let inner = Arc::clone(&observed);
    let watcher = database.clone();
    database
        .close(move || {
            *inner.lock().unwrap() = Some((watcher.is_opened(), watcher.is_blockaded()));
        })
        .unwrap();
    assert_eq!(*observed.lock().unwrap(), Some((false, true)));
    assert!(!database.is_blockaded());
    assert!(database.can_open());
}

#[test]
fn handle_configs_run_in_priority_order() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let database = open(&core, &dir, "a.db");
    let calls = Arc::new(Mutex::new(Vec::new()));
    for (name, priority) in
        [("late", Priority::LOW), ("early", Priority::HIGH), ("middle", Priority::DEFAULT)]
    {
        let calls = Arc::clone(&calls);
        let config: Arc<dyn HandleConfig> = Arc::new(move |_: &mut InnerHandle| {
            calls.lock().unwrap().push(name);
            Ok(())
        });
        database.set_config(name, config, priority);
    }
    assert_eq!(database.config_names(), vec!["early", "middle", "late"]);
    drop(database.handle().unwrap());
    assert_eq!(*calls.lock().unwrap(), vec!["early", "middle", "late"]);
}

#[test]
fn changing_configs_reopens_connections() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let database = open(&core, &dir, "a.db");
    let before = database.handle().unwrap().id();
    let config: Arc<dyn HandleConfig> = Arc::new(|handle: &mut InnerHandle| {
        handle.execute_batch("PRAGMA cache_size = -512;")
    });
    database.set_config("cache", config, Priority::DEFAULT);
    let mut handle = database.handle().unwrap();
    assert_ne!(handle.id(), before);
    assert_eq!(handle.query_i64("PRAGMA cache_size", &[]).unwrap(), Some(-512));
    drop(handle);
    assert!(database.remove_config("cache"));
    assert!(!database.remove_config("cache"));
    assert!(database.config_names().is_empty());
}

#[test]
fn failing_config_fails_acquisition_and_frees_slot() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let database = open(&core, &dir, "a.db");
    let config: Arc<dyn HandleConfig> =
        Arc::new(|_: &mut InnerHandle| Err(QuarryError::invalid("refused")));
    database.set_config("refuse", config, Priority::DEFAULT);
    assert_eq!(database.handle().unwrap_err().code(), ErrorCode::Invalid);
    assert!(database.remove_config("refuse"));
    assert!(database.try_acquire(HandleKind::Write).is_ok());
}

#[test]
fn one_path_resolves_to_one_database() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let first = open(&core, &dir, "a.db");
    let second = Database::open_in(&core, dir.path().join(".").join("a.db"), quick_config())
        .unwrap();
    let other = open(&core, &dir, "b.db");
    assert!(first.same_as(&second));
    assert!(!first.same_as(&other));
    first.set_tag(9);
    assert_eq!(second.tag(), 9);
    assert_eq!(core.live_databases(), 2);
    drop(other);
    assert_eq!(core.live_databases(), 1);
}

#[test]
fn lifecycle_operations_reach_the_operation_observer() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let observer: Arc<dyn quarry_core::OperationObserver> =
        Arc::new(move |event: &OperationEvent| {
            sink.lock().unwrap().push((event.operation, event.tag));
        });
    core.notifier().set_operation_observer(Some(observer));
    let database = open(&core, &dir, "a.db");
    database.set_tag(3);
    drop(database.handle().unwrap());
    let events = events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![(Operation::Create, 0), (Operation::SetTag, 3), (Operation::OpenHandle, 3)]
    );
}

#[test]
fn invalid_configuration_is_rejected() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let err = Database::open_in(
        &core,
        db_path(&dir, "a.db"),
        EngineConfig { max_readers: 0, ..EngineConfig::default() },
    )
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Invalid);
}

#[test]
fn reset_forgets_observers_and_registrations() {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let observer: Arc<dyn quarry_core::OperationObserver> =
        Arc::new(move |_: &OperationEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    core.notifier().set_operation_observer(Some(observer));
    let database = open(&core, &dir, "a.db");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    core.reset();
    database.set_tag(1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
