// crates/quarry-store-sqlite/src/context.rs
// ============================================================================
// Module: Handle Context
// Description: Per-database state shared by every handle of one path.
// Purpose: Give handles the path, tag, tracers, and error reporting they need.
// Dependencies: quarry-core, tracing
// ============================================================================

//! ## Overview
//! A [`HandleContext`] is shared between a database and all of its handles,
//! idle or issued. It owns nothing that refers back to the pool, so pooled
//! handles never keep their database alive. Every failure a handle reports
//! flows through [`HandleContext::report`], which enriches the record,
//! forwards it to error observers, and registers corruption.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use quarry_core::ObserverSlot;
use quarry_core::Operation;
use quarry_core::OperationEvent;
use quarry_core::PerformanceObserver;
use quarry_core::PerformanceTrace;
use quarry_core::QuarryError;
use quarry_core::SqlObserver;
use quarry_core::SqlTrace;
use quarry_core::error::keys;

use crate::overlay::OverlayRegistry;
use crate::service::Core;

// ============================================================================
// SECTION: Context
// ============================================================================

/// State shared by a database and its handles.
pub(crate) struct HandleContext {
    /// Process service that owns global observers and registries.
    core: Arc<Core>,
    /// Absolute database path.
    path: PathBuf,
    /// Path rendered once for traces and registry keys.
    path_key: String,
    /// Caller-assigned tag.
    tag: AtomicI64,
    /// Per-database performance observer.
    performance: ObserverSlot<dyn PerformanceObserver>,
    /// Per-database SQL observer.
    sql: ObserverSlot<dyn SqlObserver>,
    /// Count of committed write activity, used by the backup driver.
    writes: AtomicU64,
    /// Unfinished migration mappings every handle shadows.
    overlay: OverlayRegistry,
}

impl HandleContext {
    /// Creates a context for `path`.
    pub(crate) fn new(core: Arc<Core>, path: PathBuf) -> Self {
        let path_key = path.to_string_lossy().into_owned();
        Self {
            core,
            path,
            path_key,
            tag: AtomicI64::new(0),
            performance: ObserverSlot::new(),
            sql: ObserverSlot::new(),
            writes: AtomicU64::new(0),
            overlay: OverlayRegistry::default(),
        }
    }

    /// Returns the process service.
    pub(crate) const fn core(&self) -> &Arc<Core> {
        &self.core
    }

    /// Returns the database path.
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the database path as a registry key.
    pub(crate) fn path_key(&self) -> &str {
        &self.path_key
    }

    /// Returns the migration overlay registry.
    pub(crate) const fn overlay(&self) -> &OverlayRegistry {
        &self.overlay
    }

    /// Returns the tag.
    pub(crate) fn tag(&self) -> i64 {
        self.tag.load(Ordering::Relaxed)
    }

    /// Replaces the tag.
    pub(crate) fn set_tag(&self, tag: i64) {
        self.tag.store(tag, Ordering::Relaxed);
    }

    /// Sets the per-database performance observer.
    pub(crate) fn set_performance_observer(&self, observer: Option<Arc<dyn PerformanceObserver>>) {
        self.performance.set(observer);
    }

    /// Sets the per-database SQL observer.
    pub(crate) fn set_sql_observer(&self, observer: Option<Arc<dyn SqlObserver>>) {
        self.sql.set(observer);
    }

    /// Returns true when any statement observer is registered.
    pub(crate) fn traces_statements(&self) -> bool {
        self.performance.is_set() || self.sql.is_set() || self.core.notifier().traces_statements()
    }

    /// Emits a SQL trace to the database and global observers.
    pub(crate) fn trace_sql(&self, handle_id: u64, sql: &str) {
        let trace = SqlTrace {
            tag: self.tag(),
            path: self.path_key.clone(),
            handle_id,
            sql: sql.to_string(),
        };
        if let Some(observer) = self.sql.get() {
            observer.on_sql(&trace);
        }
        self.core.notifier().notify_sql(&trace);
    }

    /// Emits a performance trace to the database and global observers.
    pub(crate) fn trace_performance(&self, handle_id: u64, sql: &str, cost: Duration) {
        let trace = PerformanceTrace {
            tag: self.tag(),
            path: self.path_key.clone(),
            handle_id,
            sql: sql.to_string(),
            cost,
        };
        if let Some(observer) = self.performance.get() {
            observer.on_performance(&trace);
        }
        self.core.notifier().notify_performance(&trace);
    }

    /// Emits a lifecycle operation.
    pub(crate) fn emit_operation(&self, operation: Operation) {
        let event = OperationEvent {
            path: self.path_key.clone(),
            tag: self.tag(),
            operation,
        };
        self.core.notifier().notify_operation(&event);
    }

    /// Records committed write activity.
    pub(crate) fn note_writes(&self, changes: u64) {
        if changes > 0 {
            self.writes.fetch_add(changes, Ordering::Relaxed);
        }
    }

    /// Returns the committed write counter.
    pub(crate) fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Enriches, publishes, and returns an error.
    ///
    /// Corruption codes register the path as corrupted.
    pub(crate) fn report(&self, error: QuarryError) -> QuarryError {
        let error = self.publish(error);
        if error.is_corruption() {
            self.core.notifier().mark_corrupted(&self.path_key, self.tag());
        }
        error
    }

    /// Enriches and publishes an error without touching the corruption
    /// registry.
    pub(crate) fn report_unregistered(&self, error: QuarryError) -> QuarryError {
        self.publish(error)
    }

    /// Attaches path and tag context and forwards to error observers.
    fn publish(&self, error: QuarryError) -> QuarryError {
        let error = if error.path().is_some() {
            error
        } else {
            error.with_path(&self.path_key).with_info(keys::TAG, self.tag())
        };
        tracing::debug!(
            path = %self.path_key,
            code = %error.code(),
            message = %error.message(),
            "database error reported"
        );
        self.core.notifier().notify_error(&error);
        error
    }
}
