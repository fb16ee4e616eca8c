// crates/quarry-core/tests/notifier.rs
// ============================================================================
// Module: Notifier Tests
// Description: Observer scoping, corruption registry, and JSON error log.
// Purpose: Validate at-most-one-observer scopes and fire-once corruption.
// ============================================================================

//! ## Overview
//! Tests for the observer hub:
//! - Global and per-path scopes receive the events addressed to them
//! - Setting a scope replaces the previous observer, `None` unregisters
//! - Corruption observers fire once per registration
//! - Cancellation signals are shared across clones
//! - The JSON-lines error log writes one record per error

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

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use quarry_core::CancellationSignal;
use quarry_core::CorruptionEvent;
use quarry_core::ErrorCode;
use quarry_core::JsonLineErrorObserver;
use quarry_core::MigrationUserInfo;
use quarry_core::Notifier;
use quarry_core::QuarryError;
use quarry_core::UnitOutcome;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn counting_error_observer(counter: &Arc<AtomicUsize>) -> Arc<dyn quarry_core::ErrorObserver> {
    let counter = Arc::clone(counter);
    Arc::new(move |_: &QuarryError| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn errors_reach_global_and_matching_path_observers() {
    let notifier = Notifier::new();
    let global = Arc::new(AtomicUsize::new(0));
    let scoped = Arc::new(AtomicUsize::new(0));
    notifier.set_error_observer(Some(counting_error_observer(&global)));
    notifier.set_path_error_observer("/a.db", Some(counting_error_observer(&scoped)));

    notifier.notify_error(&QuarryError::sql("boom").with_path("/a.db"));
    notifier.notify_error(&QuarryError::sql("boom").with_path("/b.db"));
    notifier.notify_error(&QuarryError::sql("no path"));

    assert_eq!(global.load(Ordering::SeqCst), 3);
    assert_eq!(scoped.load(Ordering::SeqCst), 1);
}

#[test]
fn setting_a_scope_replaces_and_none_unregisters() {
    let notifier = Notifier::new();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    notifier.set_error_observer(Some(counting_error_observer(&first)));
    notifier.set_error_observer(Some(counting_error_observer(&second)));
    notifier.notify_error(&QuarryError::busy("busy"));
    notifier.set_error_observer(None);
    notifier.notify_error(&QuarryError::busy("busy"));

    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 1);
}

#[test]
fn corruption_fires_once_until_cleared() {
    let notifier = Notifier::new();
    let global = Arc::new(AtomicUsize::new(0));
    let scoped = Arc::new(AtomicUsize::new(0));
    let global_hits = Arc::clone(&global);
    notifier.set_corruption_observer(Some(Arc::new(move |event: &CorruptionEvent| {
        assert_eq!(event.path, "/c.db");
        global_hits.fetch_add(1, Ordering::SeqCst);
    })));
    let scoped_hits = Arc::clone(&scoped);
    notifier.set_path_corruption_observer(
        "/c.db",
        Some(Arc::new(move |_: &CorruptionEvent| {
            scoped_hits.fetch_add(1, Ordering::SeqCst);
        })),
    );

    assert!(notifier.mark_corrupted("/c.db", 3));
    assert!(!notifier.mark_corrupted("/c.db", 3));
    assert!(notifier.is_corrupted("/c.db"));
    assert_eq!(global.load(Ordering::SeqCst), 1);
    assert_eq!(scoped.load(Ordering::SeqCst), 1);

    assert!(notifier.clear_corrupted("/c.db"));
    assert!(!notifier.is_corrupted("/c.db"));
    assert!(notifier.mark_corrupted("/c.db", 3));
    assert_eq!(global.load(Ordering::SeqCst), 2);
}

#[test]
fn reset_drops_registrations_and_observers() {
    let notifier = Notifier::new();
    let global = Arc::new(AtomicUsize::new(0));
    notifier.set_error_observer(Some(counting_error_observer(&global)));
    notifier.mark_corrupted("/d.db", 0);
    notifier.reset();
    notifier.notify_error(&QuarryError::io("disk"));
    assert!(!notifier.is_corrupted("/d.db"));
    assert_eq!(global.load(Ordering::SeqCst), 0);
}

#[test]
fn cancellation_is_shared_between_clones() {
    let signal = CancellationSignal::new();
    let remote = signal.clone();
    assert!(signal.checkpoint().is_ok());
    remote.cancel();
    assert!(signal.is_cancelled());
    assert!(signal.same_as(&remote));
    assert!(!signal.same_as(&CancellationSignal::new()));
    let err = signal.checkpoint().unwrap_err();
    assert_eq!(err.code(), ErrorCode::Cancelled);
}

#[test]
fn unit_outcomes_commit_on_pause_and_stop() {
    assert!(!UnitOutcome::Continue.commits());
    assert!(UnitOutcome::Pause.commits());
    assert!(UnitOutcome::Stop.commits());
}

#[test]
fn migration_user_info_freezes_source_selection() {
    let mut info = MigrationUserInfo::new("/db1", "t_new");
    info.set_source("t_old", Some("/old.db".to_string()));
    let base = info.into_base_info().unwrap();
    assert_eq!(base.source_database, "/old.db");
    assert!(base.is_cross_database());

    let unresolved = MigrationUserInfo::new("/db1", "t_final");
    assert!(unresolved.into_base_info().is_none());

    let mut same_table = MigrationUserInfo::new("/db1", "t");
    same_table.set_source("t", None);
    assert!(same_table.into_base_info().is_none());
}

#[test]
fn json_error_log_writes_one_line_per_error() {
    let log = JsonLineErrorObserver::new(Vec::new());
    let notifier = Notifier::new();
    let log = Arc::new(log);
    notifier.set_error_observer(Some(log.clone()));
    notifier.notify_error(&QuarryError::sql("first").with_path("/e.db").with_native_code(1));
    notifier.notify_error(&QuarryError::corrupted("second"));
    notifier.set_error_observer(None);

    let log = Arc::try_unwrap(log).ok().unwrap();
    assert_eq!(log.dropped(), 0);
    let bytes = log.into_inner().unwrap();
    let text = String::from_utf8(bytes).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["code"], "sql");
    assert_eq!(first["native_code"], 1);
    assert_eq!(first["infos"]["path"], "/e.db");
    let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(second["level"], "fatal");
}
