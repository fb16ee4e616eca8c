// crates/quarry-store-sqlite/src/bridge.rs
// ============================================================================
// Module: Object Bridge
// Description: Generation-checked identifiers for engine objects.
// Purpose: Let foreign callers address databases, handles, and signals
//          without holding references.
// Dependencies: quarry-core, tracing
// ============================================================================

//! ## Overview
//! The bridge owns engine objects in [`HandleTable`]s and hands out
//! [`ObjectId`]s. Every call resolves the identifier first; a stale or
//! unknown identifier yields a neutral value (`false`, `None`, or `0`)
//! instead of touching a released object.
//!
//! Long-running calls (acquiring a handle, blockading, executing SQL) run
//! with the bridge tables unlocked, so one caller never blocks another's
//! release.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use quarry_core::CancellationSignal;
use quarry_core::CheckpointMode;
use quarry_core::HandleTable;
use quarry_core::MigrationStep;
use quarry_core::ObjectId;
use quarry_core::QuarryError;

use crate::config::EngineConfig;
use crate::database::BlockadeGuard;
use crate::database::Database;
use crate::handle::HandleKind;
use crate::pool::RecyclableHandle;
use crate::service::Core;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Shared, lockable loaned handle.
type SharedHandle = Arc<Mutex<RecyclableHandle>>;

/// Objects owned by the bridge.
#[derive(Default)]
struct BridgeTables {
    /// Open databases.
    databases: HandleTable<Database>,
    /// Loaned handles.
    handles: HandleTable<SharedHandle>,
    /// Cancellation signals.
    signals: HandleTable<CancellationSignal>,
    /// Held blockades.
    blockades: HandleTable<BlockadeGuard>,
}

/// Identifier-based facade over engine objects.
pub struct ObjectBridge {
    /// Service databases are opened in.
    core: Arc<Core>,
    /// Owned objects.
    tables: Mutex<BridgeTables>,
}

impl ObjectBridge {
    /// Creates a bridge opening databases in `core`.
    #[must_use]
    pub fn new(core: Arc<Core>) -> Self {
        Self {
            core,
            tables: Mutex::new(BridgeTables::default()),
        }
    }

    /// Returns the number of live objects of every kind.
    #[must_use]
    pub fn live_objects(&self) -> usize {
        let tables = self.lock();
        tables.databases.len() + tables.handles.len() + tables.signals.len() + tables.blockades.len()
    }

    // ------------------------------------------------------------------------
    // Databases
    // ------------------------------------------------------------------------

    /// Opens `path` with the default configuration.
    #[must_use]
    pub fn open_database(&self, path: &str) -> Option<ObjectId> {
        self.open_database_with(path, EngineConfig::default())
    }

    /// Opens `path` with `config`.
    #[must_use]
    pub fn open_database_with(&self, path: &str, config: EngineConfig) -> Option<ObjectId> {
        match Database::open_in(&self.core, path, config) {
            Ok(database) => Some(self.lock().databases.insert(database)),
            Err(err) => {
                tracing::debug!(path = %path, error = %err, "bridge open failed");
                None
            }
        }
    }

    /// Releases a database reference.
    pub fn release_database(&self, id: ObjectId) -> bool {
        self.lock().databases.remove(id).is_some()
    }

    /// Returns a clone of the database behind `id`.
    #[must_use]
    pub fn database(&self, id: ObjectId) -> Option<Database> {
        self.lock().databases.get(id).cloned()
    }

    /// Returns the database path.
    #[must_use]
    pub fn database_path(&self, id: ObjectId) -> Option<String> {
        self.database(id).map(|database| database.path().to_string_lossy().into_owned())
    }

    /// Returns the database tag, or 0.
    #[must_use]
    pub fn database_tag(&self, id: ObjectId) -> i64 {
        self.database(id).map_or(0, |database| database.tag())
    }

    /// Sets the database tag.
    pub fn set_database_tag(&self, id: ObjectId, tag: i64) -> bool {
        let Some(database) = self.database(id) else {
            return false;
        };
        database.set_tag(tag);
        true
    }

    /// Returns whether the database can open a connection.
    #[must_use]
    pub fn can_open(&self, id: ObjectId) -> bool {
        self.database(id).is_some_and(|database| database.can_open())
    }

    /// Returns whether the database has any connection.
    #[must_use]
    pub fn is_opened(&self, id: ObjectId) -> bool {
        self.database(id).is_some_and(|database| database.is_opened())
    }

    /// Closes idle connections.
    pub fn purge(&self, id: ObjectId) -> bool {
        self.database(id).map(|database| database.purge()).is_some()
    }

    /// Returns this thread's last maintenance failure for the database.
    #[must_use]
    pub fn database_error(&self, id: ObjectId) -> Option<QuarryError> {
        self.database(id).and_then(|database| database.threaded_error())
    }

    /// Returns whether the path is registered as corrupted.
    #[must_use]
    pub fn is_already_corrupted(&self, id: ObjectId) -> bool {
        self.database(id).is_some_and(|database| database.is_already_corrupted())
    }

    /// Performs one migration step; true once migration is done.
    #[must_use]
    pub fn step_migration(&self, id: ObjectId) -> bool {
        self.database(id)
            .is_some_and(|database| matches!(database.step_migration(), Ok(MigrationStep::Done)))
    }

    /// Returns whether migration has completed.
    #[must_use]
    pub fn is_migrated(&self, id: ObjectId) -> bool {
        self.database(id).is_some_and(|database| database.is_migrated())
    }

    /// Runs a checkpoint; true on success.
    pub fn checkpoint(&self, id: ObjectId, mode: CheckpointMode) -> bool {
        self.database(id).is_some_and(|database| database.checkpoint(mode).is_ok())
    }

    // ------------------------------------------------------------------------
    // Blockades
    // ------------------------------------------------------------------------

    /// Blockades the database, returning the blockade identifier.
    #[must_use]
    pub fn blockade(&self, id: ObjectId) -> Option<ObjectId> {
        let guard = self.database(id)?.blockade().ok()?;
        Some(self.lock().blockades.insert(guard))
    }

    /// Lifts a blockade.
    pub fn unblockade(&self, blockade: ObjectId) -> bool {
        let guard = self.lock().blockades.remove(blockade);
        guard.is_some()
    }

    /// Returns whether the database is blockaded.
    #[must_use]
    pub fn is_blockaded(&self, id: ObjectId) -> bool {
        self.database(id).is_some_and(|database| database.is_blockaded())
    }

    // ------------------------------------------------------------------------
    // Handles
    // ------------------------------------------------------------------------

    /// Acquires a handle from the database.
    #[must_use]
    pub fn acquire_handle(&self, id: ObjectId, kind: HandleKind) -> Option<ObjectId> {
        let handle = self.database(id)?.acquire(kind).ok()?;
        Some(self.lock().handles.insert(Arc::new(Mutex::new(handle))))
    }

    /// Returns a handle to its pool.
    pub fn release_handle(&self, handle: ObjectId) -> bool {
        let released = self.lock().handles.remove(handle);
        released.is_some()
    }

    /// Executes one statement; true on success.
    pub fn handle_execute(&self, handle: ObjectId, sql: &str) -> bool {
        self.with_handle(handle, |handle| handle.execute(sql).is_ok()).unwrap_or(false)
    }

    /// Runs a single-integer query.
    #[must_use]
    pub fn handle_query_i64(&self, handle: ObjectId, sql: &str) -> Option<i64> {
        self.with_handle(handle, |handle| handle.query_i64(sql, &[]).ok().flatten()).flatten()
    }

    /// Returns rows changed by the handle's last statement, or 0.
    #[must_use]
    pub fn handle_changes(&self, handle: ObjectId) -> u64 {
        self.with_handle(handle, |handle| handle.changes()).unwrap_or(0)
    }

    /// Returns whether the handle has an open transaction.
    #[must_use]
    pub fn handle_is_in_transaction(&self, handle: ObjectId) -> bool {
        self.with_handle(handle, |handle| handle.is_in_transaction()).unwrap_or(false)
    }

    /// Begins a transaction; true on success.
    pub fn handle_begin(&self, handle: ObjectId) -> bool {
        self.with_handle(handle, |handle| handle.begin_transaction().is_ok()).unwrap_or(false)
    }

    /// Commits, rolling back on failure; true when committed.
    pub fn handle_commit(&self, handle: ObjectId) -> bool {
        self.with_handle(handle, |handle| handle.commit_or_rollback_transaction().is_ok())
            .unwrap_or(false)
    }

    /// Rolls back; true on success.
    pub fn handle_rollback(&self, handle: ObjectId) -> bool {
        self.with_handle(handle, |handle| handle.rollback_transaction().is_ok()).unwrap_or(false)
    }

    /// Returns the handle's last error.
    #[must_use]
    pub fn handle_error(&self, handle: ObjectId) -> Option<QuarryError> {
        self.with_handle(handle, |handle| handle.last_error().cloned()).flatten()
    }

    /// Attaches a signal to a handle.
    pub fn attach_signal(&self, handle: ObjectId, signal: ObjectId) -> bool {
        let Some(signal) = self.lock().signals.get(signal).cloned() else {
            return false;
        };
        self.with_handle(handle, |handle| handle.attach_cancellation_signal(&signal)).is_some()
    }

    /// Detaches the handle's signal.
    pub fn detach_signal(&self, handle: ObjectId) -> bool {
        self.with_handle(handle, |handle| handle.detach_cancellation_signal()).is_some()
    }

    /// Runs `operation` on a handle with the bridge tables unlocked.
    fn with_handle<T>(
        &self,
        handle: ObjectId,
        operation: impl FnOnce(&mut RecyclableHandle) -> T,
    ) -> Option<T> {
        let shared = self.lock().handles.get(handle).cloned()?;
        let mut handle = shared.lock().unwrap_or_else(PoisonError::into_inner);
        Some(operation(&mut handle))
    }

    // ------------------------------------------------------------------------
    // Signals
    // ------------------------------------------------------------------------

    /// Creates a cancellation signal.
    #[must_use]
    pub fn create_signal(&self) -> ObjectId {
        self.lock().signals.insert(CancellationSignal::new())
    }

    /// Cancels a signal.
    pub fn cancel_signal(&self, signal: ObjectId) -> bool {
        let Some(signal) = self.lock().signals.get(signal).cloned() else {
            return false;
        };
        signal.cancel();
        true
    }

    /// Returns whether a signal was cancelled.
    #[must_use]
    pub fn is_signal_cancelled(&self, signal: ObjectId) -> bool {
        self.lock().signals.get(signal).is_some_and(CancellationSignal::is_cancelled)
    }

    /// Releases a signal; handles it is attached to keep their copy.
    pub fn release_signal(&self, signal: ObjectId) -> bool {
        self.lock().signals.remove(signal).is_some()
    }

    /// Locks the tables.
    fn lock(&self) -> std::sync::MutexGuard<'_, BridgeTables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
