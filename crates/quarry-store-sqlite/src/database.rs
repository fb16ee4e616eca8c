// crates/quarry-store-sqlite/src/database.rs
// ============================================================================
// Module: Database
// Description: Public database facade over the shared per-path state.
// Purpose: Open databases, issue handles, register observers, and blockade.
// Dependencies: quarry-core, rusqlite, tracing
// ============================================================================

//! ## Overview
//! A [`Database`] is a cheap, cloneable reference to the state shared by
//! every opener of one path: the handle pool, the handle configs, the
//! migration state, and the background drivers. Opening the same path twice
//! through one [`Core`] yields two references to the same state.
//!
//! Maintenance operations (integrity, backup, recovery, checkpoint,
//! migration, file management) live in sibling modules as further
//! `impl Database` blocks. Each of them records its failure as this
//! thread's error for the database, readable through
//! [`Database::threaded_error`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;

use quarry_core::BackupFilter;
use quarry_core::CorruptionObserver;
use quarry_core::ErrorObserver;
use quarry_core::MigrationObserver;
use quarry_core::ObserverSlot;
use quarry_core::Operation;
use quarry_core::PerformanceObserver;
use quarry_core::QuarryError;
use quarry_core::SqlObserver;
use quarry_core::UnitOutcome;
use rusqlite::types::Value;

use crate::config::EngineConfig;
use crate::context::HandleContext;
use crate::driver::Drivers;
use crate::handle::HandleKind;
use crate::handle::InnerHandle;
use crate::handle_config::HandleConfig;
use crate::handle_config::Priority;
use crate::migration::MigrationState;
use crate::pool::AcquireMode;
use crate::pool::HandlePool;
use crate::pool::RecyclableHandle;
use crate::service::Core;
use crate::sqlite::io_error;
use crate::sqlite::validate_database_path;

// ============================================================================
// SECTION: Thread State
// ============================================================================

thread_local! {
    /// Last maintenance failure per database path on this thread.
    static THREADED_ERRORS: RefCell<HashMap<String, QuarryError>> = RefCell::new(HashMap::new());
}

// ============================================================================
// SECTION: Shared State
// ============================================================================

/// State shared by every reference to one database path.
pub(crate) struct DatabaseShared {
    /// Context shared with pooled handles.
    context: Arc<HandleContext>,
    /// Connection pool.
    pool: HandlePool,
    /// Migration filter, resolved infos, and progress.
    migration: Mutex<MigrationState>,
    /// Serializes filter queries so each table is asked once.
    migration_resolution: Mutex<()>,
    /// Migration progress observer.
    migration_observer: ObserverSlot<dyn MigrationObserver>,
    /// Table predicate applied by backups.
    backup_filter: ObserverSlot<dyn BackupFilter>,
    /// Write counter value at the last completed backup.
    backup_mark: AtomicU64,
    /// Background migration and backup drivers.
    drivers: Mutex<Drivers>,
}

impl DatabaseShared {
    /// Builds the state for an absolute path.
    fn new(core: Arc<Core>, path: std::path::PathBuf, config: EngineConfig) -> Self {
        let context = Arc::new(HandleContext::new(core, path));
        Self {
            pool: HandlePool::new(Arc::clone(&context), config),
            context,
            migration: Mutex::new(MigrationState::default()),
            migration_resolution: Mutex::new(()),
            migration_observer: ObserverSlot::new(),
            backup_filter: ObserverSlot::new(),
            backup_mark: AtomicU64::new(0),
            drivers: Mutex::new(Drivers::default()),
        }
    }

    /// Returns the handle context.
    pub(crate) const fn context(&self) -> &Arc<HandleContext> {
        &self.context
    }

    /// Returns the pool.
    pub(crate) const fn pool(&self) -> &HandlePool {
        &self.pool
    }

    /// Returns the engine configuration.
    pub(crate) const fn config(&self) -> &EngineConfig {
        self.pool.config()
    }

    /// Returns the migration state.
    pub(crate) const fn migration(&self) -> &Mutex<MigrationState> {
        &self.migration
    }

    /// Returns the lock held while the migration filter is queried.
    pub(crate) const fn migration_resolution(&self) -> &Mutex<()> {
        &self.migration_resolution
    }

    /// Returns the migration observer slot.
    pub(crate) const fn migration_observer(&self) -> &ObserverSlot<dyn MigrationObserver> {
        &self.migration_observer
    }

    /// Returns the backup filter slot.
    pub(crate) const fn backup_filter(&self) -> &ObserverSlot<dyn BackupFilter> {
        &self.backup_filter
    }

    /// Returns the write counter value recorded by the last backup.
    pub(crate) const fn backup_mark(&self) -> &AtomicU64 {
        &self.backup_mark
    }

    /// Returns the background drivers.
    pub(crate) const fn drivers(&self) -> &Mutex<Drivers> {
        &self.drivers
    }
}

// ============================================================================
// SECTION: Database
// ============================================================================

/// Reference to an open database.
#[derive(Clone)]
pub struct Database {
    /// Shared per-path state.
    shared: Arc<DatabaseShared>,
}

impl Database {
    /// Opens `path` with the default configuration in the process service.
    ///
    /// No connection is opened until a handle is acquired.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError`] when the path is invalid.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, QuarryError> {
        Self::open_in(&Core::shared(), path, EngineConfig::default())
    }

    /// Opens `path` with `config` in the process service.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError`] when the path or configuration is invalid.
    pub fn open_with_config(
        path: impl AsRef<Path>,
        config: EngineConfig,
    ) -> Result<Self, QuarryError> {
        Self::open_in(&Core::shared(), path, config)
    }

    /// Opens `path` with `config` in the service `core`.
    ///
    /// When the path is already open in `core`, the existing state is reused
    /// and `config` is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError`] when the path or configuration is invalid.
    pub fn open_in(
        core: &Arc<Core>,
        path: impl AsRef<Path>,
        config: EngineConfig,
    ) -> Result<Self, QuarryError> {
        config.validate()?;
        let requested = path.as_ref();
        let path = std::path::absolute(requested)
            .map_err(|err| io_error(&err, "resolve database path", requested))?;
        validate_database_path(&path)?;
        let key = path.to_string_lossy().into_owned();
        let (shared, created) = core.resolve_database(&key, || {
            Arc::new(DatabaseShared::new(Arc::clone(core), path, config))
        });
        if created {
            tracing::debug!(path = %key, "database created");
            shared.context.emit_operation(Operation::Create);
        }
        Ok(Self { shared })
    }

    /// Wraps existing shared state.
    pub(crate) const fn from_shared(shared: Arc<DatabaseShared>) -> Self {
        Self { shared }
    }

    /// Returns the shared state.
    pub(crate) const fn shared(&self) -> &Arc<DatabaseShared> {
        &self.shared
    }

    /// Returns the service this database belongs to.
    #[must_use]
    pub fn core(&self) -> &Arc<Core> {
        self.shared.context.core()
    }

    /// Returns the absolute database path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.shared.context.path()
    }

    /// Returns the path as a registry key.
    pub(crate) fn path_key(&self) -> &str {
        self.shared.context.path_key()
    }

    /// Returns the engine configuration in effect.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        self.shared.config()
    }

    /// Returns true when both references share one state.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    // ------------------------------------------------------------------------
    // Tag
    // ------------------------------------------------------------------------

    /// Returns the caller-assigned tag.
    #[must_use]
    pub fn tag(&self) -> i64 {
        self.shared.context.tag()
    }

    /// Assigns a tag reported with traces and errors.
    pub fn set_tag(&self, tag: i64) {
        self.shared.context.set_tag(tag);
        self.shared.context.emit_operation(Operation::SetTag);
    }

    // ------------------------------------------------------------------------
    // Handles
    // ------------------------------------------------------------------------

    /// Acquires the write handle, waiting up to the acquire timeout.
    ///
    /// # Errors
    ///
    /// Returns `Busy` when the slot stays taken or the database is
    /// blockaded, or the error raised while opening a connection.
    pub fn handle(&self) -> Result<RecyclableHandle, QuarryError> {
        self.acquire(HandleKind::Write)
    }

    /// Acquires a read handle, waiting up to the acquire timeout.
    ///
    /// # Errors
    ///
    /// Returns `Busy` when every read slot stays taken or the database is
    /// blockaded, or the error raised while opening a connection.
    pub fn read_handle(&self) -> Result<RecyclableHandle, QuarryError> {
        self.acquire(HandleKind::Read)
    }

    /// Acquires a handle of `kind`, waiting up to the acquire timeout.
    ///
    /// # Errors
    ///
    /// Returns `Busy`, `CantOpen`, or `Corrupted`.
    pub fn acquire(&self, kind: HandleKind) -> Result<RecyclableHandle, QuarryError> {
        self.acquire_with(kind, AcquireMode::Wait, false)
    }

    /// Acquires a handle of `kind` without waiting.
    ///
    /// # Errors
    ///
    /// Returns `Busy` immediately when no slot is free.
    pub fn try_acquire(&self, kind: HandleKind) -> Result<RecyclableHandle, QuarryError> {
        self.acquire_with(kind, AcquireMode::Try, false)
    }

    /// Acquires through the pool.
    pub(crate) fn acquire_with(
        &self,
        kind: HandleKind,
        mode: AcquireMode,
        bypass: bool,
    ) -> Result<RecyclableHandle, QuarryError> {
        let handle = self.shared.pool.acquire(kind, mode, bypass)?;
        let mut handle = RecyclableHandle::new(handle, Arc::clone(&self.shared));
        if !bypass {
            self.resolve_pending_migration(&mut handle);
        }
        Ok(handle)
    }

    /// Returns true when a connection can be opened and released.
    #[must_use]
    pub fn can_open(&self) -> bool {
        self.read_handle().is_ok()
    }

    /// Returns true when any connection is idle or issued.
    #[must_use]
    pub fn is_opened(&self) -> bool {
        self.shared.pool.is_opened()
    }

    /// Closes every idle connection, returning how many were closed.
    pub fn purge(&self) -> usize {
        self.shared.pool.purge()
    }

    /// Blockades the database, closes every connection, runs `on_closed`,
    /// and lifts the blockade.
    ///
    /// # Errors
    ///
    /// Returns `Busy` when issued handles do not drain in time.
    pub fn close(&self, on_closed: impl FnOnce()) -> Result<(), QuarryError> {
        let guard = self.track(self.blockade())?;
        self.shared.pool.purge();
        on_closed();
        drop(guard);
        tracing::debug!(path = %self.path_key(), "database closed");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Blockade
    // ------------------------------------------------------------------------

    /// Refuses new acquisitions and waits for issued handles to return.
    ///
    /// The blockade lasts until the returned guard is dropped; the guard can
    /// still acquire handles.
    ///
    /// # Errors
    ///
    /// Returns `Busy` when already blockaded or when issued handles do not
    /// drain within the configured timeout.
    pub fn blockade(&self) -> Result<BlockadeGuard, QuarryError> {
        self.shared.pool.blockade()?;
        Ok(BlockadeGuard {
            shared: Arc::clone(&self.shared),
        })
    }

    /// Returns true while a blockade is held.
    #[must_use]
    pub fn is_blockaded(&self) -> bool {
        self.shared.pool.is_blockaded()
    }

    // ------------------------------------------------------------------------
    // Handle Configs
    // ------------------------------------------------------------------------

    /// Registers or replaces the handle config `name`.
    ///
    /// Idle connections are closed so every future handle runs the new set.
    pub fn set_config(&self, name: &str, config: Arc<dyn HandleConfig>, priority: Priority) {
        self.shared.pool.set_config(name, config, priority);
    }

    /// Removes the handle config `name`, returning true when it existed.
    pub fn remove_config(&self, name: &str) -> bool {
        self.shared.pool.remove_config(name)
    }

    /// Returns registered handle config names in invocation order.
    #[must_use]
    pub fn config_names(&self) -> Vec<String> {
        self.shared.pool.config_names()
    }

    // ------------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------------

    /// Sets the performance observer of this database.
    pub fn set_performance_observer(&self, observer: Option<Arc<dyn PerformanceObserver>>) {
        self.shared.context.set_performance_observer(observer);
    }

    /// Sets the SQL observer of this database.
    pub fn set_sql_observer(&self, observer: Option<Arc<dyn SqlObserver>>) {
        self.shared.context.set_sql_observer(observer);
    }

    /// Sets the error observer scoped to this path.
    pub fn set_error_observer(&self, observer: Option<Arc<dyn ErrorObserver>>) {
        self.core().notifier().set_path_error_observer(self.path_key(), observer);
    }

    /// Sets the corruption observer scoped to this path.
    pub fn set_notification_when_corrupted(&self, observer: Option<Arc<dyn CorruptionObserver>>) {
        self.core().notifier().set_path_corruption_observer(self.path_key(), observer);
    }

    // ------------------------------------------------------------------------
    // Threaded Errors
    // ------------------------------------------------------------------------

    /// Returns this thread's last maintenance failure for this database.
    #[must_use]
    pub fn threaded_error(&self) -> Option<QuarryError> {
        THREADED_ERRORS.with(|errors| errors.borrow().get(self.path_key()).cloned())
    }

    /// Forgets this thread's last maintenance failure for this database.
    pub fn clear_threaded_error(&self) {
        THREADED_ERRORS.with(|errors| {
            errors.borrow_mut().remove(self.path_key());
        });
    }

    /// Records a failure as this thread's error and passes the result on.
    pub(crate) fn track<T>(&self, result: Result<T, QuarryError>) -> Result<T, QuarryError> {
        if let Err(err) = &result {
            THREADED_ERRORS.with(|errors| {
                errors.borrow_mut().insert(self.path_key().to_string(), err.clone());
            });
        }
        result
    }

    // ------------------------------------------------------------------------
    // Convenience
    // ------------------------------------------------------------------------

    /// Executes one statement on the write handle.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError`] when acquisition or execution fails.
    pub fn execute(&self, sql: &str) -> Result<(), QuarryError> {
        self.execute_with(sql, &[])
    }

    /// Executes one statement with parameters on the write handle.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError`] when acquisition or execution fails.
    pub fn execute_with(&self, sql: &str, params: &[Value]) -> Result<(), QuarryError> {
        let mut handle = self.handle()?;
        handle.execute_with(sql, params)
    }

    /// Runs a query on a read handle.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError`] when acquisition or the query fails.
    pub fn query_rows(&self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>, QuarryError> {
        let mut handle = self.read_handle()?;
        handle.query_rows(sql, params)
    }

    /// Runs a single-integer query on a read handle.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError`] when acquisition or the query fails.
    pub fn query_i64(&self, sql: &str, params: &[Value]) -> Result<Option<i64>, QuarryError> {
        let mut handle = self.read_handle()?;
        handle.query_i64(sql, params)
    }

    /// Runs `body` in a transaction on the write handle.
    ///
    /// # Errors
    ///
    /// Returns the body's error or the transaction control failure.
    pub fn run_transaction<F>(&self, body: F) -> Result<bool, QuarryError>
    where
        F: FnOnce(&mut InnerHandle) -> Result<bool, QuarryError>,
    {
        let mut handle = self.handle()?;
        handle.run_transaction(body)
    }

    /// Runs a pausable transaction on the write handle.
    ///
    /// # Errors
    ///
    /// Returns the unit's error, a `Cancelled` error, or a transaction
    /// control failure.
    pub fn run_pausable_transaction<F>(&self, unit: F) -> Result<(), QuarryError>
    where
        F: FnMut(&mut InnerHandle, bool) -> Result<UnitOutcome, QuarryError>,
    {
        let mut handle = self.handle()?;
        handle.run_pausable_transaction(unit)
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path_key())
            .field("tag", &self.tag())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SECTION: Blockade Guard
// ============================================================================

/// Proof of a held blockade; lifts it when dropped.
pub struct BlockadeGuard {
    /// Blockaded database.
    shared: Arc<DatabaseShared>,
}

impl BlockadeGuard {
    /// Acquires a handle of `kind` past the blockade.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError`] when the connection cannot be opened.
    pub fn handle(&self, kind: HandleKind) -> Result<RecyclableHandle, QuarryError> {
        Database::from_shared(Arc::clone(&self.shared)).acquire_with(kind, AcquireMode::Wait, true)
    }

    /// Returns true when this guard blockades `database`.
    #[must_use]
    pub fn guards(&self, database: &Database) -> bool {
        Arc::ptr_eq(&self.shared, database.shared())
    }
}

impl Drop for BlockadeGuard {
    fn drop(&mut self) {
        self.shared.pool.unblockade();
    }
}

impl fmt::Debug for BlockadeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockadeGuard")
            .field("path", &self.shared.context.path_key())
            .finish()
    }
}
