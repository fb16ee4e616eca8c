// crates/quarry-store-sqlite/src/service.rs
// ============================================================================
// Module: Engine Service
// Description: Process-scoped registry of databases and observers.
// Purpose: Share one pool per path and one observer hub per process.
// Dependencies: quarry-core, tracing
// ============================================================================

//! ## Overview
//! [`Core`] is the process-scoped service behind every database: it owns the
//! [`Notifier`] (global observers, per-path observers, corrupted-path set) and
//! the registry that maps a database path to its shared state, so opening
//! the same path twice reuses one handle pool.
//!
//! ## Lifecycle
//! - [`Core::shared`] lazily creates the process instance on first use.
//! - [`Core::new`] creates an isolated instance for injection (tests,
//!   embedding several independent engines in one process).
//! - [`Core::reset`] unregisters every observer, clears the corrupted-path
//!   set, and forgets databases that are no longer alive. Databases still in
//!   use stay registered so their pools are never duplicated.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::sync::PoisonError;
use std::sync::Weak;

use quarry_core::Notifier;

use crate::database::DatabaseShared;

// ============================================================================
// SECTION: Globals
// ============================================================================

/// Process-wide service instance.
static SHARED_CORE: OnceLock<Arc<Core>> = OnceLock::new();

// ============================================================================
// SECTION: Core
// ============================================================================

/// Process-scoped engine service.
///
/// # Invariants
/// - At most one live database state exists per path key.
pub struct Core {
    /// Observer hub and corrupted-path registry.
    notifier: Notifier,
    /// Live database states keyed by absolute path.
    databases: Mutex<HashMap<String, Weak<DatabaseShared>>>,
}

impl Core {
    /// Creates an isolated service instance.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            notifier: Notifier::new(),
            databases: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the process-wide service instance.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::clone(SHARED_CORE.get_or_init(Self::new))
    }

    /// Returns the observer hub.
    #[must_use]
    pub const fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Returns the number of live databases.
    #[must_use]
    pub fn live_databases(&self) -> usize {
        self.databases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|state| state.strong_count() > 0)
            .count()
    }

    /// Unregisters observers, clears corruption registrations, and forgets
    /// dropped databases.
    pub fn reset(&self) {
        self.notifier.reset();
        self.databases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, state| state.strong_count() > 0);
        tracing::debug!("engine service reset");
    }

    /// Returns the live state for `key`, or registers the one built by
    /// `create`.
    ///
    /// The boolean is true when a new state was registered.
    pub(crate) fn resolve_database(
        &self,
        key: &str,
        create: impl FnOnce() -> Arc<DatabaseShared>,
    ) -> (Arc<DatabaseShared>, bool) {
        let mut databases = self.databases.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = databases.get(key).and_then(Weak::upgrade) {
            return (existing, false);
        }
        databases.retain(|_, state| state.strong_count() > 0);
        let shared = create();
        databases.insert(key.to_string(), Arc::downgrade(&shared));
        drop(databases);
        (shared, true)
    }
}
