// crates/quarry-core/src/notifier.rs
// ============================================================================
// Module: Notifier
// Description: Observer registry with global and per-path scopes.
// Purpose: Route engine events to at most one observer per scope.
// Dependencies: tracing
// ============================================================================

//! ## Overview
//! The [`Notifier`] owns the process-level observer slots and the corrupted
//! path registry. Each scope holds at most one observer: setting a scope
//! replaces its observer and setting `None` unregisters it. Observers are
//! cloned out of their slot before being called, so no lock is held while
//! user code runs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::RwLock;

use crate::error::QuarryError;
use crate::interfaces::CorruptionEvent;
use crate::interfaces::CorruptionObserver;
use crate::interfaces::ErrorObserver;
use crate::interfaces::OperationEvent;
use crate::interfaces::OperationObserver;
use crate::interfaces::PerformanceObserver;
use crate::interfaces::PerformanceTrace;
use crate::interfaces::SqlObserver;
use crate::interfaces::SqlTrace;

// ============================================================================
// SECTION: Observer Slot
// ============================================================================

/// Holds at most one observer.
pub struct ObserverSlot<T: ?Sized> {
    /// Registered observer.
    inner: RwLock<Option<Arc<T>>>,
}

impl<T: ?Sized> Default for ObserverSlot<T> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }
}

impl<T: ?Sized> ObserverSlot<T> {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the observer; `None` unregisters.
    pub fn set(&self, observer: Option<Arc<T>>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = observer;
    }

    /// Returns a clone of the registered observer.
    #[must_use]
    pub fn get(&self) -> Option<Arc<T>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Returns true when an observer is registered.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}

/// Holds at most one observer per path.
struct PathSlots<T: ?Sized> {
    /// Observers keyed by database path.
    inner: RwLock<HashMap<String, Arc<T>>>,
}

impl<T: ?Sized> Default for PathSlots<T> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: ?Sized> PathSlots<T> {
    /// Replaces the observer for `path`; `None` unregisters.
    fn set(&self, path: &str, observer: Option<Arc<T>>) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match observer {
            Some(observer) => {
                guard.insert(path.to_string(), observer);
            }
            None => {
                guard.remove(path);
            }
        }
    }

    /// Returns the observer for `path`.
    fn get(&self, path: &str) -> Option<Arc<T>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).get(path).cloned()
    }

    /// Drops every observer.
    fn clear(&self) {
        self.inner.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

// ============================================================================
// SECTION: Notifier
// ============================================================================

/// Process-level observer hub and corrupted path registry.
///
/// # Invariants
/// - A path fires corruption observers once per registration; it must be
///   cleared before it can fire again.
#[derive(Default)]
pub struct Notifier {
    /// Global statement timing observer.
    performance: ObserverSlot<dyn PerformanceObserver>,
    /// Global statement text observer.
    sql: ObserverSlot<dyn SqlObserver>,
    /// Global error observer.
    error: ObserverSlot<dyn ErrorObserver>,
    /// Per-path error observers.
    path_errors: PathSlots<dyn ErrorObserver>,
    /// Global lifecycle observer.
    operation: ObserverSlot<dyn OperationObserver>,
    /// Global corruption observer.
    corruption: ObserverSlot<dyn CorruptionObserver>,
    /// Per-path corruption observers.
    path_corruption: PathSlots<dyn CorruptionObserver>,
    /// Paths currently registered as corrupted.
    corrupted: Mutex<HashSet<String>>,
}

impl Notifier {
    /// Creates an empty notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the global performance observer.
    pub fn set_performance_observer(&self, observer: Option<Arc<dyn PerformanceObserver>>) {
        self.performance.set(observer);
    }

    /// Sets the global SQL observer.
    pub fn set_sql_observer(&self, observer: Option<Arc<dyn SqlObserver>>) {
        self.sql.set(observer);
    }

    /// Sets the global error observer.
    pub fn set_error_observer(&self, observer: Option<Arc<dyn ErrorObserver>>) {
        self.error.set(observer);
    }

    /// Sets the error observer for one path.
    pub fn set_path_error_observer(&self, path: &str, observer: Option<Arc<dyn ErrorObserver>>) {
        self.path_errors.set(path, observer);
    }

    /// Sets the global operation observer.
    pub fn set_operation_observer(&self, observer: Option<Arc<dyn OperationObserver>>) {
        self.operation.set(observer);
    }

    /// Sets the global corruption observer.
    pub fn set_corruption_observer(&self, observer: Option<Arc<dyn CorruptionObserver>>) {
        self.corruption.set(observer);
    }

    /// Sets the corruption observer for one path.
    pub fn set_path_corruption_observer(
        &self,
        path: &str,
        observer: Option<Arc<dyn CorruptionObserver>>,
    ) {
        self.path_corruption.set(path, observer);
    }

    /// Returns true when statement tracing has any consumer.
    #[must_use]
    pub fn traces_statements(&self) -> bool {
        self.sql.is_set() || self.performance.is_set()
    }

    /// Forwards a statement to the global SQL observer.
    pub fn notify_sql(&self, trace: &SqlTrace) {
        if let Some(observer) = self.sql.get() {
            observer.on_sql(trace);
        }
    }

    /// Forwards a statement timing to the global performance observer.
    pub fn notify_performance(&self, trace: &PerformanceTrace) {
        if let Some(observer) = self.performance.get() {
            observer.on_performance(trace);
        }
    }

    /// Forwards an error to the global observer and the observer of its path.
    pub fn notify_error(&self, error: &QuarryError) {
        if let Some(observer) = self.error.get() {
            observer.on_error(error);
        }
        if let Some(path) = error.path()
            && let Some(observer) = self.path_errors.get(path)
        {
            observer.on_error(error);
        }
    }

    /// Forwards a lifecycle operation.
    pub fn notify_operation(&self, event: &OperationEvent) {
        if let Some(observer) = self.operation.get() {
            observer.on_operation(event);
        }
    }

    /// Registers `path` as corrupted, firing observers on a new registration.
    ///
    /// Returns true when the path was not registered before.
    pub fn mark_corrupted(&self, path: &str, tag: i64) -> bool {
        let inserted = self
            .corrupted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string());
        if !inserted {
            return false;
        }
        tracing::warn!(path = %path, tag, "database registered as corrupted");
        let event = CorruptionEvent {
            path: path.to_string(),
            tag,
        };
        if let Some(observer) = self.path_corruption.get(path) {
            observer.on_corrupted(&event);
        }
        if let Some(observer) = self.corruption.get() {
            observer.on_corrupted(&event);
        }
        true
    }

    /// Removes the corruption registration for `path`.
    ///
    /// Returns true when the path was registered.
    pub fn clear_corrupted(&self, path: &str) -> bool {
        let removed =
            self.corrupted.lock().unwrap_or_else(PoisonError::into_inner).remove(path);
        if removed {
            tracing::info!(path = %path, "database corruption registration cleared");
        }
        removed
    }

    /// Returns true when `path` is registered as corrupted.
    #[must_use]
    pub fn is_corrupted(&self, path: &str) -> bool {
        self.corrupted.lock().unwrap_or_else(PoisonError::into_inner).contains(path)
    }

    /// Drops every observer and registration.
    pub fn reset(&self) {
        self.performance.set(None);
        self.sql.set(None);
        self.error.set(None);
        self.path_errors.clear();
        self.operation.set(None);
        self.corruption.set(None);
        self.path_corruption.clear();
        self.corrupted.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}
