// crates/quarry-store-sqlite/src/migration.rs
// ============================================================================
// Module: Migration Engine
// Description: Incremental row migration from source tables into tables.
// Purpose: Move legacy rows in bounded transactions, foreground or background.
// Dependencies: quarry-core, rusqlite, tracing
// ============================================================================

//! ## Overview
//! A migration filter maps destination tables of a database onto source
//! tables, possibly in another database file. The filter is asked once per
//! destination table, lazily, and its answer is cached until a new filter is
//! installed.
//!
//! ## Steps
//! Each step moves at most `migration_batch_rows` rows of one source table,
//! in ascending rowid order, inside a single `BEGIN IMMEDIATE` transaction
//! on the write handle: the shared columns are copied with
//! `INSERT OR IGNORE` (existing destination rows win on key conflicts) and
//! exactly the copied rows are deleted from the source. An emptied source is
//! dropped. When no mapping has work left, the database is marked migrated
//! and observers receive one terminal `None` notification.
//!
//! ## Visibility
//! Unfinished mappings are published to every handle of the database, which
//! shadows each destination with a union view over the rows still waiting
//! in the source. Reads through the destination name therefore see every
//! row from the moment a mapping is resolved, and writes to rows that have
//! not moved yet take effect. Mappings are resolved when the first handle
//! is acquired after a filter is installed, and again on every step.
//!
//! ## Cross-Database Sources
//! A source in another file is attached once per connection under a
//! private alias and detached after its last mapping finishes. A source file
//! that does not exist is treated as an absent source and is never created.
//! In WAL journal mode `SQLite` commits attached databases independently, so
//! a crash between the two commits can leave a batch in both tables;
//! `INSERT OR IGNORE` and the rowid cursor keep the next step from
//! duplicating keyed rows.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::PoisonError;
use std::time::Duration;

use quarry_core::ErrorCode;
use quarry_core::MigrationBaseInfo;
use quarry_core::MigrationFilter;
use quarry_core::MigrationObserver;
use quarry_core::MigrationStep;
use quarry_core::MigrationUserInfo;
use quarry_core::QuarryError;
use quarry_core::error::keys;
use rusqlite::types::Value;

use crate::database::Database;
use crate::driver::BackgroundDriver;
use crate::handle::HandleKind;
use crate::handle::InnerHandle;
use crate::overlay::OverlayTable;
use crate::pool::AcquireMode;
use crate::sqlite::is_internal_table;
use crate::sqlite::quote_identifier;

// ============================================================================
// SECTION: State
// ============================================================================

/// Progress of one resolved mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryProgress {
    /// No rows moved yet by this process.
    Pending,
    /// At least one batch moved.
    Started,
    /// Source emptied and dropped.
    Finished,
}

/// Resolved mapping and its progress.
#[derive(Debug, Clone)]
struct MigrationEntry {
    /// Source and destination.
    info: MigrationBaseInfo,
    /// Progress so far.
    progress: EntryProgress,
}

/// Migration state of one database.
#[derive(Default)]
pub(crate) struct MigrationState {
    /// Installed filter.
    filter: Option<Arc<dyn MigrationFilter>>,
    /// Bumped whenever the filter changes.
    filter_generation: u64,
    /// Filter answers per destination table; `None` means no migration.
    entries: BTreeMap<String, Option<MigrationEntry>>,
    /// True until the tables present when the filter was installed are
    /// resolved.
    unresolved: bool,
    /// True once a step found no remaining work.
    migrated: bool,
    /// True once the terminal notification fired.
    terminal_notified: bool,
}

/// Outcome of one batch against one mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchOutcome {
    /// Rows moved; more may remain.
    Moved,
    /// Source was empty and has been dropped.
    Finished,
    /// Source table does not exist.
    SourceMissing,
}

// ============================================================================
// SECTION: Database API
// ============================================================================

impl Database {
    /// Installs or clears the migration filter.
    ///
    /// Cached answers of a previous filter are discarded. The filter runs on
    /// the thread that acquires a handle or steps the migration and must not
    /// use this database itself.
    pub fn filter_migration(&self, filter: Option<Arc<dyn MigrationFilter>>) {
        {
            let mut state =
                self.shared().migration().lock().unwrap_or_else(PoisonError::into_inner);
            state.unresolved = filter.is_some();
            state.filter = filter;
            state.filter_generation = state.filter_generation.wrapping_add(1);
            state.entries.clear();
            state.migrated = false;
            state.terminal_notified = false;
        }
        self.publish_overlay();
    }

    /// Sets the observer notified after each step and once at completion.
    pub fn set_notification_when_migrated(&self, observer: Option<Arc<dyn MigrationObserver>>) {
        self.shared().migration_observer().set(observer);
    }

    /// Returns true when no filter is installed or migration has completed.
    #[must_use]
    pub fn is_migrated(&self) -> bool {
        let state = self.shared().migration().lock().unwrap_or_else(PoisonError::into_inner);
        state.filter.is_none() || state.migrated
    }

    /// Returns the mappings resolved so far.
    #[must_use]
    pub fn migration_infos(&self) -> Vec<MigrationBaseInfo> {
        let state = self.shared().migration().lock().unwrap_or_else(PoisonError::into_inner);
        state.entries.values().flatten().map(|entry| entry.info.clone()).collect()
    }

    /// Performs one bounded migration step on the write handle.
    ///
    /// # Errors
    ///
    /// Returns `Busy` when the write handle cannot be acquired, `Corrupted`
    /// when a source table vanished mid-migration, or the engine error of a
    /// failed batch (the batch is rolled back).
    pub fn step_migration(&self) -> Result<MigrationStep, QuarryError> {
        self.track(self.step_migration_with(AcquireMode::Wait))
    }

    /// Starts or stops the background migration driver.
    ///
    /// The driver steps every `auto_migration_interval_ms`, skips ticks
    /// while the write handle is taken, and exits once migration is done.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError`] when the driver thread cannot be spawned.
    pub fn enable_auto_migration(&self, enabled: bool) -> Result<(), QuarryError> {
        let mut drivers = self.shared().drivers().lock().unwrap_or_else(PoisonError::into_inner);
        if !enabled {
            let previous = drivers.migration.take();
            drop(drivers);
            drop(previous);
            return Ok(());
        }
        if drivers.migration.as_ref().is_some_and(|driver| !driver.is_finished()) {
            return Ok(());
        }
        let weak = Arc::downgrade(self.shared());
        let interval = Duration::from_millis(self.config().auto_migration_interval_ms);
        let driver = BackgroundDriver::spawn("quarry-migration", interval, move || {
            let Some(shared) = weak.upgrade() else {
                return false;
            };
            let database = Database::from_shared(shared);
            match database.step_migration_with(AcquireMode::Try) {
                Ok(MigrationStep::Done) => false,
                Ok(MigrationStep::Stepped) => true,
                Err(err) if err.code() == ErrorCode::Busy => true,
                Err(err) => {
                    tracing::warn!(
                        path = %database.path().display(),
                        error = %err,
                        "background migration step failed"
                    );
                    err.code().is_retryable()
                }
            }
        })?;
        let previous = drivers.migration.replace(driver);
        drop(drivers);
        drop(previous);
        Ok(())
    }

    /// Performs one step, acquiring the write handle per `mode`.
    pub(crate) fn step_migration_with(&self, mode: AcquireMode) -> Result<MigrationStep, QuarryError> {
        let (filter, generation) = {
            let state =
                self.shared().migration().lock().unwrap_or_else(PoisonError::into_inner);
            match &state.filter {
                Some(filter) if !state.migrated => (Arc::clone(filter), state.filter_generation),
                _ => return Ok(MigrationStep::Done),
            }
        };

        let mut handle = self.acquire_with(HandleKind::Write, mode, false)?;
        let tables = user_tables(&mut handle)?;
        self.resolve_tables(filter.as_ref(), generation, &tables);
        self.publish_overlay();

        let next = {
            let state =
                self.shared().migration().lock().unwrap_or_else(PoisonError::into_inner);
            if state.filter_generation != generation {
                return Ok(MigrationStep::Stepped);
            }
            state
                .entries
                .values()
                .flatten()
                .find(|entry| entry.progress != EntryProgress::Finished)
                .cloned()
        };

        let Some(entry) = next else {
            drop(handle);
            self.finish_migration(generation);
            return Ok(MigrationStep::Done);
        };

        let batch_rows = self.config().migration_batch_rows;
        let outcome = migrate_batch(&mut handle, &entry.info, batch_rows)?;
        drop(handle);
        let progress = match outcome {
            BatchOutcome::Moved => EntryProgress::Started,
            BatchOutcome::Finished => EntryProgress::Finished,
            BatchOutcome::SourceMissing if entry.progress == EntryProgress::Pending => {
                tracing::debug!(
                    path = %self.path_key(),
                    table = %entry.info.table,
                    source = %entry.info.source_table,
                    "migration source absent, nothing to migrate"
                );
                self.set_progress(generation, &entry.info.table, EntryProgress::Finished);
                return Ok(MigrationStep::Stepped);
            }
            BatchOutcome::SourceMissing => {
                let error = QuarryError::corrupted("migration source table is missing")
                    .with_info(keys::TABLE, entry.info.source_table.as_str());
                return Err(self.shared().context().report_unregistered(error));
            }
        };
        self.set_progress(generation, &entry.info.table, progress);
        tracing::debug!(
            path = %self.path_key(),
            table = %entry.info.table,
            source = %entry.info.source_table,
            finished = progress == EntryProgress::Finished,
            "migration step completed"
        );
        if let Some(observer) = self.shared().migration_observer().get() {
            observer.on_migrated(self.path_key(), Some(&entry.info));
        }
        Ok(MigrationStep::Stepped)
    }

    /// Resolves the mappings of a newly installed filter on `handle`, so
    /// unfinished destinations are shadowed before any step runs.
    pub(crate) fn resolve_pending_migration(&self, handle: &mut InnerHandle) {
        let (filter, generation) = {
            let state =
                self.shared().migration().lock().unwrap_or_else(PoisonError::into_inner);
            match &state.filter {
                Some(filter) if state.unresolved => (Arc::clone(filter), state.filter_generation),
                _ => return,
            }
        };
        match user_tables(handle) {
            Ok(tables) => {
                self.resolve_tables(filter.as_ref(), generation, &tables);
                {
                    let mut state =
                        self.shared().migration().lock().unwrap_or_else(PoisonError::into_inner);
                    if state.filter_generation == generation {
                        state.unresolved = false;
                    }
                }
                self.publish_overlay();
            }
            Err(err) => {
                tracing::debug!(
                    path = %self.path_key(),
                    error = %err,
                    "migration tables not resolved"
                );
            }
        }
    }

    /// Publishes the unfinished mappings to every handle.
    fn publish_overlay(&self) {
        let tables: Vec<OverlayTable> = {
            let state =
                self.shared().migration().lock().unwrap_or_else(PoisonError::into_inner);
            state
                .entries
                .values()
                .flatten()
                .filter(|entry| entry.progress != EntryProgress::Finished)
                .map(|entry| OverlayTable {
                    table: entry.info.table.clone(),
                    source_database: entry
                        .info
                        .is_cross_database()
                        .then(|| PathBuf::from(&entry.info.source_database)),
                    source_table: entry.info.source_table.clone(),
                })
                .collect()
        };
        self.shared().context().overlay().publish(tables);
    }

    /// Asks the filter about every table it has not seen yet.
    fn resolve_tables(&self, filter: &dyn MigrationFilter, generation: u64, tables: &[String]) {
        let _resolving = self
            .shared()
            .migration_resolution()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for table in tables {
            let known = self
                .shared()
                .migration()
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entries
                .contains_key(table);
            if known {
                continue;
            }
            let mut request = MigrationUserInfo::new(self.path_key(), table.as_str());
            filter.filter(&mut request);
            let resolved = request.into_base_info().and_then(|info| self.normalize(info)).map(
                |info| MigrationEntry {
                    info,
                    progress: EntryProgress::Pending,
                },
            );
            let mut state =
                self.shared().migration().lock().unwrap_or_else(PoisonError::into_inner);
            if state.filter_generation == generation {
                state.entries.entry(table.clone()).or_insert(resolved);
            }
        }
    }

    /// Makes the source path absolute, dropping self-mappings.
    fn normalize(&self, mut info: MigrationBaseInfo) -> Option<MigrationBaseInfo> {
        if info.source_database != info.database
            && let Ok(absolute) = std::path::absolute(&info.source_database)
        {
            info.source_database = absolute.to_string_lossy().into_owned();
        }
        if info.source_database == self.path_key() && info.source_table == info.table {
            return None;
        }
        Some(info)
    }

    /// Records progress for `table` when the filter is unchanged.
    fn set_progress(&self, generation: u64, table: &str, progress: EntryProgress) {
        {
            let mut state =
                self.shared().migration().lock().unwrap_or_else(PoisonError::into_inner);
            if state.filter_generation != generation {
                return;
            }
            if let Some(Some(entry)) = state.entries.get_mut(table) {
                entry.progress = progress;
            }
        }
        if progress == EntryProgress::Finished {
            self.publish_overlay();
        }
    }

    /// Marks migration complete and fires the terminal notification once.
    fn finish_migration(&self, generation: u64) {
        let notify = {
            let mut state =
                self.shared().migration().lock().unwrap_or_else(PoisonError::into_inner);
            if state.filter_generation != generation {
                return;
            }
            state.migrated = true;
            !std::mem::replace(&mut state.terminal_notified, true)
        };
        self.publish_overlay();
        if notify {
            tracing::info!(path = %self.path_key(), "migration completed");
            if let Some(observer) = self.shared().migration_observer().get() {
                observer.on_migrated(self.path_key(), None);
            }
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Lists user tables of the main schema.
fn user_tables(handle: &mut InnerHandle) -> Result<Vec<String>, QuarryError> {
    let rows = handle.query_rows(
        "SELECT name FROM main.sqlite_master WHERE type = 'table' ORDER BY name",
        &[],
    )?;
    Ok(rows
        .into_iter()
        .filter_map(|row| match row.into_iter().next() {
            Some(Value::Text(name)) if !is_internal_table(&name) => Some(name),
            _ => None,
        })
        .collect())
}

/// Lists the column names of `schema.table`.
fn table_columns(
    handle: &mut InnerHandle,
    schema: &str,
    table: &str,
) -> Result<Vec<String>, QuarryError> {
    let sql = format!("PRAGMA {schema}.table_info({})", quote_identifier(table));
    let rows = handle.query_rows(&sql, &[])?;
    Ok(rows
        .into_iter()
        .filter_map(|row| match row.into_iter().nth(1) {
            Some(Value::Text(name)) => Some(name),
            _ => None,
        })
        .collect())
}

/// Moves one batch for `info` through the schema the handle holds its
/// source in.
fn migrate_batch(
    handle: &mut InnerHandle,
    info: &MigrationBaseInfo,
    batch_rows: usize,
) -> Result<BatchOutcome, QuarryError> {
    handle.sync_overlay();
    let schema = if info.is_cross_database() {
        let path = Path::new(&info.source_database);
        if !path.is_file() {
            return Ok(BatchOutcome::SourceMissing);
        }
        match handle.overlay_schema(Some(path)) {
            Some(schema) => schema,
            None => {
                return Err(handle.fail(
                    QuarryError::cant_open("migration source database is not attached")
                        .with_info(keys::TABLE, info.source_table.as_str()),
                ));
            }
        }
    } else {
        "main".to_string()
    };
    let mut outcome = BatchOutcome::SourceMissing;
    handle.run_transaction(|handle| {
        outcome = move_rows(handle, &schema, info, batch_rows)?;
        Ok(true)
    })?;
    Ok(outcome)
}

/// Copies and deletes the first batch of source rows.
fn move_rows(
    handle: &mut InnerHandle,
    schema: &str,
    info: &MigrationBaseInfo,
    batch_rows: usize,
) -> Result<BatchOutcome, QuarryError> {
    let exists = handle
        .query_i64(
            &format!(
                "SELECT count(*) FROM {schema}.sqlite_master WHERE type = 'table' AND name = ?1"
            ),
            &[Value::Text(info.source_table.clone())],
        )?
        .unwrap_or(0)
        > 0;
    if !exists {
        return Ok(BatchOutcome::SourceMissing);
    }

    let source = format!("{schema}.{}", quote_identifier(&info.source_table));
    let destination = format!("main.{}", quote_identifier(&info.table));
    let limit = i64::try_from(batch_rows).unwrap_or(i64::MAX);
    let last = handle.query_i64(
        &format!(
            "SELECT max(moved) FROM (SELECT rowid AS moved FROM {source} ORDER BY rowid LIMIT ?1)"
        ),
        &[Value::Integer(limit)],
    )?;
    let Some(last) = last else {
        handle.release_overlay_view(&info.table)?;
        handle.execute(&format!("DROP TABLE {source}"))?;
        return Ok(BatchOutcome::Finished);
    };

    let source_columns = table_columns(handle, schema, &info.source_table)?;
    let columns: Vec<String> = table_columns(handle, "main", &info.table)?
        .into_iter()
        .filter(|column| source_columns.contains(column))
        .map(|column| quote_identifier(&column))
        .collect();
    if columns.is_empty() {
        return Err(handle.fail(
            QuarryError::sql("migration source and destination share no columns")
                .with_info(keys::TABLE, info.table.as_str()),
        ));
    }
    let columns = columns.join(", ");
    handle.execute_with(
        &format!(
            "INSERT OR IGNORE INTO {destination} ({columns}) SELECT {columns} FROM {source} \
             WHERE rowid <= ?1 ORDER BY rowid"
        ),
        &[Value::Integer(last)],
    )?;
    handle.execute_with(&format!("DELETE FROM {source} WHERE rowid <= ?1"), &[Value::Integer(last)])?;
    Ok(BatchOutcome::Moved)
}
