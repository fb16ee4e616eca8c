// crates/quarry-store-sqlite/tests/transactions.rs
// ============================================================================
// Module: Transaction Tests
// Description: Plain, nested, and pausable transactions with cancellation.
// Purpose: Validate commit and rollback rules on pooled handles.
// Dependencies: quarry-store-sqlite, quarry-core, rusqlite, tempfile
// ============================================================================

//! ## Overview
//! Covers the transaction surface of [`InnerHandle`]:
//! - `run_transaction` commits on `true`, rolls back on `false` or error
//! - Nested begins and stray commits are misuse
//! - Pausable transactions commit on pause, stop, and cancellation
//! - Cancellation interrupts running statements and refuses new ones
//! - Readers keep a stable snapshot while the writer commits

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
use std::thread;
use std::time::Duration;

use quarry_core::CancellationSignal;
use quarry_core::ErrorCode;
use quarry_core::QuarryError;
use quarry_core::TransactionState;
use quarry_core::UnitOutcome;
use quarry_store_sqlite::Core;
use quarry_store_sqlite::Database;
use quarry_store_sqlite::EngineConfig;
use quarry_store_sqlite::InnerHandle;
use rusqlite::params;
use rusqlite::types::Value;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn setup() -> (Arc<Core>, TempDir, Database) {
    let core = Core::new();
    let dir = TempDir::new().unwrap();
    let database =
        Database::open_in(&core, dir.path().join("tx.db"), EngineConfig::default()).unwrap();
    database.execute("CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT)").unwrap();
    (core, dir, database)
}

fn count(database: &Database) -> i64 {
    database.query_i64("SELECT count(*) FROM items", &[]).unwrap().unwrap()
}

fn insert(handle: &mut InnerHandle, label: &str) -> Result<(), QuarryError> {
    handle.execute_with("INSERT INTO items (label) VALUES (?1)", &[Value::Text(label.into())])
}

// ============================================================================
// SECTION: Plain Transactions
// ============================================================================

#[test]
fn run_transaction_commits_on_true() {
    let (_core, _dir, database) = setup();
    let committed = database
        .run_transaction(|handle| {
            insert(handle, "a")?;
            insert(handle, "b")?;
            Ok(true)
        })
        .unwrap();
    assert!(committed);
    assert_eq!(count(&database), 2);
}

#[test]
fn run_transaction_rolls_back_on_false() {
    let (_core, _dir, database) = setup();
    let committed = database
        .run_transaction(|handle| {
            insert(handle, "a")?;
            assert_eq!(handle.transaction_state(), TransactionState::InTransaction);
            Ok(false)
        })
        .unwrap();
    assert!(!committed);
    assert_eq!(count(&database), 0);
    assert!(!database.handle().unwrap().is_in_transaction());
}

#[test]
fn run_transaction_rolls_back_and_propagates_errors() {
    let (_core, _dir, database) = setup();
    let err = database
        .run_transaction(|handle| {
            insert(handle, "a")?;
            handle.execute("INSERT INTO missing (x) VALUES (1)")?;
            Ok(true)
        })
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Sql);
    assert_eq!(err.sql_text(), Some("INSERT INTO missing (x) VALUES (1)"));
    assert_eq!(count(&database), 0);
}

#[test]
fn nested_begin_and_stray_commit_are_misuse() {
    let (_core, _dir, database) = setup();
    let mut handle = database.handle().unwrap();
    assert_eq!(handle.commit_or_rollback_transaction().unwrap_err().code(), ErrorCode::Misuse);
    handle.begin_transaction().unwrap();
    assert_eq!(handle.begin_transaction().unwrap_err().code(), ErrorCode::Misuse);
    assert_eq!(handle.last_error().map(QuarryError::code), Some(ErrorCode::Misuse));
    insert(&mut handle, "a").unwrap();
    handle.commit_or_rollback_transaction().unwrap();
    assert!(handle.rollback_transaction().is_ok());
    drop(handle);
    assert_eq!(count(&database), 1);
}

#[test]
fn released_handle_rolls_back_open_transaction() {
    let (_core, _dir, database) = setup();
    let mut handle = database.handle().unwrap();
    handle.begin_transaction().unwrap();
    insert(&mut handle, "a").unwrap();
    drop(handle);
    assert_eq!(count(&database), 0);
    let handle = database.handle().unwrap();
    assert_eq!(handle.transaction_state(), TransactionState::Idle);
    assert!(handle.last_error().is_none());
}

#[test]
fn change_counters_follow_caller_statements() {
    let (_core, _dir, database) = setup();
    let mut handle = database.handle().unwrap();
    handle.execute("INSERT INTO items (label) VALUES ('a'), ('b'), ('c')").unwrap();
    assert_eq!(handle.changes(), 3);
    assert_eq!(handle.last_inserted_row_id(), 3);
    handle.execute("UPDATE items SET label = 'z' WHERE id = 2").unwrap();
    assert_eq!(handle.changes(), 1);
    assert!(handle.total_changes() >= 4);
}

#[test]
fn prepared_statements_are_cached_and_reusable() {
    let (_core, _dir, database) = setup();
    let mut handle = database.handle().unwrap();
    for label in ["a", "b", "c"] {
        let mut statement = handle.prepared("INSERT INTO items (label) VALUES (?1)").unwrap();
        statement.execute(params![label]).unwrap();
    }
    handle.finalize_statements();
    assert!(handle.table_exists("items").unwrap());
    assert!(!handle.table_exists("absent").unwrap());
    let rows = handle.query_rows("SELECT label FROM items ORDER BY id", &[]).unwrap();
    assert_eq!(
        rows,
        vec![
            vec![Value::Text("a".into())],
            vec![Value::Text("b".into())],
            vec![Value::Text("c".into())],
        ]
    );
    assert!(handle.prepared("SELECT nope FROM").is_err());
    assert_eq!(handle.last_error().map(QuarryError::code), Some(ErrorCode::Sql));
}

#[test]
fn readers_keep_their_snapshot() {
    let (_core, _dir, database) = setup();
    database.execute("INSERT INTO items (label) VALUES ('a')").unwrap();
    let mut reader = database.read_handle().unwrap();
    reader.begin_transaction().unwrap();
    assert_eq!(reader.query_i64("SELECT count(*) FROM items", &[]).unwrap(), Some(1));
    database.execute("INSERT INTO items (label) VALUES ('b')").unwrap();
    assert_eq!(reader.query_i64("SELECT count(*) FROM items", &[]).unwrap(), Some(1));
    reader.commit_or_rollback_transaction().unwrap();
    assert_eq!(reader.query_i64("SELECT count(*) FROM items", &[]).unwrap(), Some(2));
}

// ============================================================================
// SECTION: Pausable Transactions
// ============================================================================

#[test]
fn pausable_transaction_commits_on_pause_and_stop() {
    let (_core, _dir, database) = setup();
    let mut starts = Vec::new();
    let mut unit = 0;
    database
        .run_pausable_transaction(|handle, is_new| {
            starts.push(is_new);
            unit += 1;
            insert(handle, &format!("unit-{unit}"))?;
            Ok(match unit {
                2 | 4 => UnitOutcome::Pause,
                5 => UnitOutcome::Stop,
                _ => UnitOutcome::Continue,
            })
        })
        .unwrap();
    assert_eq!(starts, vec![true, false, true, false, true]);
    assert_eq!(count(&database), 5);
}

#[test]
fn pausable_transaction_rolls_back_failed_unit_only() {
    let (_core, _dir, database) = setup();
    let mut unit = 0;
    let err = database
        .run_pausable_transaction(|handle, _| {
            unit += 1;
            insert(handle, "row")?;
            if unit == 3 {
                return Err(QuarryError::invalid("unit failed"));
            }
            Ok(UnitOutcome::Pause)
        })
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Invalid);
    assert_eq!(count(&database), 2);
}

#[test]
fn cancelled_pausable_transaction_keeps_completed_units() {
    let (_core, _dir, database) = setup();
    let signal = CancellationSignal::new();
    let mut handle = database.handle().unwrap();
    handle.attach_cancellation_signal(&signal);
    let mut unit = 0;
    let err = handle
        .run_pausable_transaction(|handle, _| {
            unit += 1;
            insert(handle, "row")?;
            if unit == 5 {
                signal.cancel();
            }
            Ok(if unit % 2 == 0 { UnitOutcome::Pause } else { UnitOutcome::Continue })
        })
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Cancelled);
    assert_eq!(unit, 5);
    assert!(!handle.is_in_transaction());
    assert!(handle.is_cancelled());
    drop(handle);
    assert_eq!(count(&database), 5);
}

#[test]
fn pausable_transaction_refuses_to_nest() {
    let (_core, _dir, database) = setup();
    let mut handle = database.handle().unwrap();
    handle.begin_transaction().unwrap();
    let err = handle.run_pausable_transaction(|_, _| Ok(UnitOutcome::Stop)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Misuse);
    assert!(handle.is_in_transaction());
}

// ============================================================================
// SECTION: Cancellation
// ============================================================================

#[test]
fn cancelled_signal_refuses_new_statements() {
    let (_core, _dir, database) = setup();
    let signal = CancellationSignal::new();
    let mut handle = database.handle().unwrap();
    handle.attach_cancellation_signal(&signal);
    signal.cancel();
    let err = insert(&mut handle, "a").unwrap_err();
    assert_eq!(err.code(), ErrorCode::Cancelled);
    handle.detach_cancellation_signal();
    assert!(!handle.is_cancelled());
    insert(&mut handle, "a").unwrap();
}

#[test]
fn cancellation_interrupts_running_statement() {
    let (_core, _dir, database) = setup();
    let signal = CancellationSignal::new();
    let mut handle = database.read_handle().unwrap();
    handle.attach_cancellation_signal(&signal);
    let canceller = {
        let signal = signal.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            signal.cancel();
        })
    };
    let err = handle
        .query_rows(
            "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 1000000000) \
             SELECT count(*) FROM c",
            &[],
        )
        .unwrap_err();
    canceller.join().unwrap();
    assert_eq!(err.code(), ErrorCode::Cancelled);
}

#[test]
fn recycled_handle_drops_its_signal() {
    let (_core, _dir, database) = setup();
    let signal = CancellationSignal::new();
    let mut handle = database.handle().unwrap();
    handle.attach_cancellation_signal(&signal);
    signal.cancel();
    drop(handle);
    let mut handle = database.handle().unwrap();
    assert!(!handle.is_cancelled());
    insert(&mut handle, "a").unwrap();
}
