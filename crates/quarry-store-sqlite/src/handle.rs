// crates/quarry-store-sqlite/src/handle.rs
// ============================================================================
// Module: Inner Handle
// Description: One physical SQLite connection with transaction control.
// Purpose: Execute statements, track changes and errors, honor cancellation.
// Dependencies: quarry-core, rusqlite, tracing
// ============================================================================

//! ## Overview
//! An [`InnerHandle`] wraps one connection. Statements run through a single
//! path that checks the attached [`CancellationSignal`], emits SQL and
//! performance traces, records change counters, and reports failures to the
//! database's observers while keeping the last error on the handle.
//!
//! ## Migration Overlay
//! Before a caller statement runs, the handle brings its connection in line
//! with the unfinished migration mappings of the database. A write refused
//! by an overlay view is retried against the destination table.
//!
//! ## Transactions
//! Write handles begin with `BEGIN IMMEDIATE` so a transaction owns the write
//! lock from its first statement; read handles use a deferred `BEGIN`.
//! Transactions do not nest. A failed commit is always followed by a
//! rollback, so a handle never straddles both outcomes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Instant;

use quarry_core::CancellationSignal;
use quarry_core::QuarryError;
use quarry_core::TransactionState;
use quarry_core::UnitOutcome;
use quarry_core::error::keys;
use rusqlite::Batch;
use rusqlite::CachedStatement;
use rusqlite::Connection;
use rusqlite::fallible_iterator::FallibleIterator;
use rusqlite::params_from_iter;
use rusqlite::types::Value;

use crate::context::HandleContext;
use crate::overlay::HandleOverlay;
use crate::sqlite::sqlite_error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Virtual machine instructions between cancellation polls inside a statement.
const PROGRESS_HANDLER_OPS: i32 = 100;

/// Writes retried after an overlay view refused them.
const OVERLAY_RETRIES: usize = 8;

/// Source of process-unique handle identifiers.
static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// SECTION: Types
// ============================================================================

/// Capability of a pooled handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    /// May write; at most one is issued at a time.
    Write,
    /// Query-only; several may be issued concurrently.
    Read,
}

impl HandleKind {
    /// Returns a stable lowercase label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Read => "read",
        }
    }
}

/// How a statement interacts with cancellation and change counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatementMode {
    /// Caller statement: honors cancellation and updates counters.
    User,
    /// Transaction control: always runs, leaves counters alone.
    Control,
}

/// One physical connection.
///
/// # Invariants
/// - Used by one thread at a time (`Send`, not `Sync`).
/// - `pending_writes` is zero whenever no transaction is open.
pub struct InnerHandle {
    /// Underlying connection.
    connection: Connection,
    /// Handle capability.
    kind: HandleKind,
    /// Process-unique identifier used in traces.
    id: u64,
    /// Shared database context.
    context: Arc<HandleContext>,
    /// Pool config generation the connection was opened under.
    generation: u64,
    /// Last error reported by this handle.
    last_error: Option<QuarryError>,
    /// Rows changed by the last caller statement.
    last_changes: u64,
    /// Rows changed by caller statements since the connection opened.
    total_changes: u64,
    /// Rows changed inside the open transaction.
    pending_writes: u64,
    /// Attached cancellation signal.
    cancellation: Option<CancellationSignal>,
    /// Migration views and attachments of this connection.
    overlay: HandleOverlay,
}

impl InnerHandle {
    /// Wraps a configured connection.
    pub(crate) fn new(
        connection: Connection,
        kind: HandleKind,
        context: Arc<HandleContext>,
        generation: u64,
    ) -> Self {
        Self {
            connection,
            kind,
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            context,
            generation,
            last_error: None,
            last_changes: 0,
            total_changes: 0,
            pending_writes: 0,
            cancellation: None,
            overlay: HandleOverlay::default(),
        }
    }

    // ------------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------------

    /// Returns the handle identifier.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Returns the handle capability.
    #[must_use]
    pub const fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Returns true for query-only handles.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        matches!(self.kind, HandleKind::Read)
    }

    /// Returns the database path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.context.path()
    }

    /// Returns the database tag.
    #[must_use]
    pub fn tag(&self) -> i64 {
        self.context.tag()
    }

    /// Returns the config generation the connection was opened under.
    pub(crate) const fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the shared database context.
    pub(crate) const fn context(&self) -> &Arc<HandleContext> {
        &self.context
    }

    /// Returns the raw connection.
    pub(crate) const fn connection(&self) -> &Connection {
        &self.connection
    }

    // ------------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------------

    /// Executes one statement, discarding any rows.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError`] when the statement fails or cancellation was
    /// requested.
    pub fn execute(&mut self, sql: &str) -> Result<(), QuarryError> {
        self.execute_with(sql, &[])
    }

    /// Executes one statement with bound parameters, discarding any rows.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError`] when the statement fails or cancellation was
    /// requested.
    pub fn execute_with(&mut self, sql: &str, params: &[Value]) -> Result<(), QuarryError> {
        self.run_statement(sql, params, StatementMode::User, |_| Ok(()))
    }

    /// Executes several semicolon-separated statements.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError`] when any statement fails.
    pub fn execute_batch(&mut self, sql: &str) -> Result<(), QuarryError> {
        self.check_cancelled(sql)?;
        self.sync_overlay();
        let traced = self.context.traces_statements();
        if traced {
            self.context.trace_sql(self.id, sql);
        }
        let started = Instant::now();
        let outcome = self.run_batch(sql);
        if traced {
            self.context.trace_performance(self.id, sql, started.elapsed());
        }
        outcome.map_err(|err| self.fail(sqlite_error(&err).with_sql(sql)))?;
        let changes = u64::try_from(self.connection.changes()).unwrap_or(0);
        self.record_changes(changes, StatementMode::User);
        Ok(())
    }

    /// Runs a query and returns every row as owned values.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError`] when the query fails.
    pub fn query_rows(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<Vec<Value>>, QuarryError> {
        let mut rows = Vec::new();
        self.run_statement(sql, params, StatementMode::User, |row| {
            rows.push(read_row(row)?);
            Ok(())
        })?;
        Ok(rows)
    }

    /// Runs a query and returns the first column of the first row as an
    /// integer.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError`] when the query fails.
    pub fn query_i64(&mut self, sql: &str, params: &[Value]) -> Result<Option<i64>, QuarryError> {
        let rows = self.query_rows(sql, params)?;
        Ok(rows.first().and_then(|row| row.first()).and_then(|value| match value {
            Value::Integer(value) => Some(*value),
            _ => None,
        }))
    }

    /// Returns the cached prepared statement for `sql`, preparing it once.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError`] when the statement cannot be prepared.
    pub fn prepared(&mut self, sql: &str) -> Result<CachedStatement<'_>, QuarryError> {
        self.sync_overlay();
        if self.kind == HandleKind::Write && self.overlay.has_views() {
            self.prepare_around_overlay(sql)?;
        }
        let Self {
            connection,
            last_error,
            context,
            id,
            ..
        } = self;
        connection.prepare_cached(sql).map_err(|err| {
            record_failure(last_error, context, *id, sqlite_error(&err).with_sql(sql))
        })
    }

    /// Drops every cached prepared statement.
    pub fn finalize_statements(&mut self) {
        self.connection.flush_prepared_statement_cache();
    }

    /// Returns whether `table` exists in the main schema.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError`] when the schema cannot be read.
    pub fn table_exists(&mut self, table: &str) -> Result<bool, QuarryError> {
        let count = self.query_i64(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            &[Value::Text(table.to_string())],
        )?;
        Ok(count.unwrap_or(0) > 0)
    }

    /// Returns rows changed by the last caller statement.
    #[must_use]
    pub const fn changes(&self) -> u64 {
        self.last_changes
    }

    /// Returns rows changed by caller statements on this connection.
    #[must_use]
    pub const fn total_changes(&self) -> u64 {
        self.total_changes
    }

    /// Returns the rowid of the most recent successful insert.
    #[must_use]
    pub fn last_inserted_row_id(&self) -> i64 {
        self.connection.last_insert_rowid()
    }

    /// Returns the last error reported by this handle.
    #[must_use]
    pub const fn last_error(&self) -> Option<&QuarryError> {
        self.last_error.as_ref()
    }

    // ------------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------------

    /// Attaches `signal`; statements observe it before and while running.
    pub fn attach_cancellation_signal(&mut self, signal: &CancellationSignal) {
        install_progress_handler(&self.connection, Some(signal.flag()));
        self.cancellation = Some(signal.clone());
    }

    /// Detaches the current signal, if any.
    pub fn detach_cancellation_signal(&mut self) {
        if self.cancellation.take().is_some() {
            install_progress_handler(&self.connection, None);
        }
    }

    /// Returns true when the attached signal was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.as_ref().is_some_and(CancellationSignal::is_cancelled)
    }

    // ------------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------------

    /// Returns true when a transaction is open.
    #[must_use]
    pub fn is_in_transaction(&self) -> bool {
        !self.connection.is_autocommit()
    }

    /// Returns the transaction state.
    #[must_use]
    pub fn transaction_state(&self) -> TransactionState {
        if self.is_in_transaction() {
            TransactionState::InTransaction
        } else {
            TransactionState::Idle
        }
    }

    /// Opens a transaction.
    ///
    /// # Errors
    ///
    /// Returns a `Misuse` error when a transaction is already open, or the
    /// engine error when the lock cannot be taken.
    pub fn begin_transaction(&mut self) -> Result<(), QuarryError> {
        if self.is_in_transaction() {
            return Err(self.fail(QuarryError::misuse(
                "cannot begin a transaction inside another transaction",
            )));
        }
        self.check_cancelled("BEGIN")?;
        let sql = match self.kind {
            HandleKind::Write => "BEGIN IMMEDIATE",
            HandleKind::Read => "BEGIN",
        };
        self.run_statement(sql, &[], StatementMode::Control, |_| Ok(()))
    }

    /// Commits the open transaction, rolling back when the commit fails.
    ///
    /// # Errors
    ///
    /// Returns a `Misuse` error when no transaction is open, or the commit
    /// failure after the rollback.
    pub fn commit_or_rollback_transaction(&mut self) -> Result<(), QuarryError> {
        if !self.is_in_transaction() {
            return Err(self.fail(QuarryError::misuse("no open transaction to commit")));
        }
        match self.run_statement("COMMIT", &[], StatementMode::Control, |_| Ok(())) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.rollback_quietly();
                Err(err)
            }
        }
    }

    /// Rolls back the open transaction; a no-op when none is open.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError`] when the rollback fails.
    pub fn rollback_transaction(&mut self) -> Result<(), QuarryError> {
        self.pending_writes = 0;
        if !self.is_in_transaction() {
            return Ok(());
        }
        self.overlay.invalidate();
        self.run_statement("ROLLBACK", &[], StatementMode::Control, |_| Ok(()))
    }

    /// Runs `body` inside a transaction.
    ///
    /// `Ok(true)` from the body commits, `Ok(false)` rolls back, and an error
    /// rolls back and propagates.
    ///
    /// # Errors
    ///
    /// Returns the body's error or the transaction control failure.
    pub fn run_transaction<F>(&mut self, body: F) -> Result<bool, QuarryError>
    where
        F: FnOnce(&mut Self) -> Result<bool, QuarryError>,
    {
        self.begin_transaction()?;
        match body(self) {
            Ok(true) => {
                self.commit_or_rollback_transaction()?;
                Ok(true)
            }
            Ok(false) => {
                self.rollback_transaction()?;
                Ok(false)
            }
            Err(err) => {
                self.rollback_quietly();
                Err(err)
            }
        }
    }

    /// Runs `unit` repeatedly as a sequence of transactions.
    ///
    /// `unit` receives the handle and whether it is the first unit of a new
    /// transaction. [`UnitOutcome::Continue`] keeps the transaction open,
    /// [`UnitOutcome::Pause`] commits and starts a fresh transaction for the
    /// next unit, and [`UnitOutcome::Stop`] commits and returns. Before each
    /// unit the attached signal is polled: when cancelled, completed units
    /// are committed and a `Cancelled` error is returned. A failing unit
    /// rolls back the open transaction.
    ///
    /// # Errors
    ///
    /// Returns the unit's error, a `Cancelled` error, or a transaction
    /// control failure.
    pub fn run_pausable_transaction<F>(&mut self, mut unit: F) -> Result<(), QuarryError>
    where
        F: FnMut(&mut Self, bool) -> Result<UnitOutcome, QuarryError>,
    {
        if self.is_in_transaction() {
            return Err(self.fail(QuarryError::misuse(
                "pausable transaction cannot run inside another transaction",
            )));
        }
        loop {
            if self.is_cancelled() {
                if self.is_in_transaction() {
                    self.commit_or_rollback_transaction()?;
                }
                return Err(self.fail(QuarryError::cancelled("pausable transaction cancelled")));
            }
            let is_new_transaction = !self.is_in_transaction();
            if is_new_transaction {
                self.begin_transaction()?;
            }
            let outcome = match unit(self, is_new_transaction) {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.rollback_quietly();
                    return Err(err);
                }
            };
            match outcome {
                UnitOutcome::Continue => {}
                UnitOutcome::Pause => {
                    self.commit_or_rollback_transaction()?;
                    thread::yield_now();
                }
                UnitOutcome::Stop => {
                    self.commit_or_rollback_transaction()?;
                    return Ok(());
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Pool support
    // ------------------------------------------------------------------------

    /// Clears per-use state before the handle returns to the pool.
    pub(crate) fn recycle(&mut self) {
        self.rollback_quietly();
        self.detach_cancellation_signal();
        self.last_error = None;
        self.last_changes = 0;
    }

    /// Reports an error through this handle.
    pub(crate) fn fail(&mut self, error: QuarryError) -> QuarryError {
        record_failure(&mut self.last_error, &self.context, self.id, error)
    }

    /// Rolls back, logging instead of returning a failure.
    fn rollback_quietly(&mut self) {
        if let Err(err) = self.rollback_transaction() {
            tracing::warn!(
                path = %self.context.path_key(),
                handle = self.id,
                error = %err,
                "rollback failed"
            );
        }
    }

    /// Fails when the attached signal was cancelled.
    fn check_cancelled(&mut self, sql: &str) -> Result<(), QuarryError> {
        if self.is_cancelled() {
            return Err(self.fail(
                QuarryError::cancelled("statement refused after cancellation").with_sql(sql),
            ));
        }
        Ok(())
    }

    /// Runs one statement through tracing, counters, and error reporting.
    fn run_statement<F>(
        &mut self,
        sql: &str,
        params: &[Value],
        mode: StatementMode,
        mut on_row: F,
    ) -> Result<(), QuarryError>
    where
        F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<()>,
    {
        if mode == StatementMode::User {
            self.check_cancelled(sql)?;
            self.sync_overlay();
        }
        let traced = self.context.traces_statements();
        if traced {
            self.context.trace_sql(self.id, sql);
        }
        let started = Instant::now();
        let outcome = self.step_through_overlay(sql, params, &mut on_row);
        if traced {
            self.context.trace_performance(self.id, sql, started.elapsed());
        }
        match outcome {
            Ok(changes) => {
                self.record_changes(changes, mode);
                Ok(())
            }
            Err(err) => Err(self.fail(sqlite_error(&err).with_sql(sql))),
        }
    }

    // ------------------------------------------------------------------------
    // Migration overlay
    // ------------------------------------------------------------------------

    /// Brings the connection's overlay views in line with the database.
    pub(crate) fn sync_overlay(&mut self) {
        let read_only = self.is_read_only();
        self.overlay.sync(
            &self.connection,
            self.context.overlay(),
            read_only,
            self.context.path_key(),
        );
    }

    /// Returns the schema holding a migration source on this connection.
    pub(crate) fn overlay_schema(&self, source_database: Option<&Path>) -> Option<String> {
        self.overlay.source_schema(source_database)
    }

    /// Drops the overlay view shadowing `table` on this connection.
    pub(crate) fn release_overlay_view(&mut self, table: &str) -> Result<(), QuarryError> {
        self.overlay
            .release(&self.connection, table)
            .map_err(|err| self.fail(sqlite_error(&err).with_operation("release overlay view")))
    }

    /// Returns the overlay view that refused a write on this handle.
    fn refused_view(&self, err: &rusqlite::Error) -> Option<String> {
        if self.kind == HandleKind::Write { self.overlay.refused_view(err) } else { None }
    }

    /// Steps one statement, routing writes refused by an overlay view.
    ///
    /// An insert runs once against the destination table with the view
    /// dropped; any other write first drains the view's source.
    fn step_through_overlay<F>(
        &mut self,
        sql: &str,
        params: &[Value],
        on_row: &mut F,
    ) -> rusqlite::Result<u64>
    where
        F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<()>,
    {
        let mut attempts = 0;
        loop {
            let failure = match step_statement(&self.connection, sql, params, on_row) {
                Ok(changes) => return Ok(changes),
                Err(err) => err,
            };
            let Some(key) = self.refused_view(&failure) else {
                return Err(failure);
            };
            attempts += 1;
            if attempts > OVERLAY_RETRIES {
                return Err(failure);
            }
            if is_insert(sql) {
                let Some(view) = self.overlay.suspend(&self.connection, &key)? else {
                    return Err(failure);
                };
                let outcome = step_statement(&self.connection, sql, params, on_row);
                self.overlay.restore(&self.connection, view, self.context.path_key());
                return outcome;
            }
            self.overlay.drain(&self.connection, &key, self.context.path_key())?;
        }
    }

    /// Runs a batch statement by statement, draining overlay views that
    /// refuse one of them.
    fn run_batch(&mut self, sql: &str) -> rusqlite::Result<()> {
        let mut batch = Batch::new(&self.connection, sql);
        let mut attempts = 0;
        loop {
            let next = match batch.next() {
                Ok(next) => next,
                Err(err) => {
                    let key = if self.kind == HandleKind::Write {
                        self.overlay.refused_view(&err)
                    } else {
                        None
                    };
                    attempts += 1;
                    match key {
                        Some(key) if attempts <= OVERLAY_RETRIES => {
                            self.overlay.drain(&self.connection, &key, self.context.path_key())?;
                            continue;
                        }
                        _ => return Err(err),
                    }
                }
            };
            let Some(mut statement) = next else {
                return Ok(());
            };
            if statement.column_count() == 0 {
                statement.raw_execute()?;
            } else {
                let mut rows = statement.raw_query();
                while rows.next()?.is_some() {}
            }
        }
    }

    /// Drains overlay views until `sql` prepares or fails for another reason.
    fn prepare_around_overlay(&mut self, sql: &str) -> Result<(), QuarryError> {
        for _ in 0 .. OVERLAY_RETRIES {
            let failure = match self.connection.prepare_cached(sql) {
                Ok(_) => return Ok(()),
                Err(err) => err,
            };
            let Some(key) = self.overlay.refused_view(&failure) else {
                return Ok(());
            };
            self.overlay
                .drain(&self.connection, &key, self.context.path_key())
                .map_err(|err| self.fail(sqlite_error(&err).with_sql(sql)))?;
        }
        Ok(())
    }

    /// Updates change counters and publishes committed writes.
    fn record_changes(&mut self, changes: u64, mode: StatementMode) {
        if mode == StatementMode::User {
            self.last_changes = changes;
            self.total_changes = self.total_changes.saturating_add(changes);
            self.pending_writes = self.pending_writes.saturating_add(changes);
        }
        if !self.is_in_transaction() {
            let committed = std::mem::take(&mut self.pending_writes);
            self.context.note_writes(committed);
        }
    }
}

impl fmt::Debug for InnerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InnerHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("path", &self.context.path_key())
            .field("in_transaction", &self.is_in_transaction())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reports `error` through `context` and stores it as the handle's last error.
fn record_failure(
    last_error: &mut Option<QuarryError>,
    context: &HandleContext,
    handle_id: u64,
    error: QuarryError,
) -> QuarryError {
    let handle_id = i64::try_from(handle_id).unwrap_or(i64::MAX);
    let error = context.report(error.with_info(keys::HANDLE, handle_id));
    *last_error = Some(error.clone());
    error
}

/// Prepares (or reuses) and steps one statement, returning rows changed.
fn step_statement<F>(
    connection: &Connection,
    sql: &str,
    params: &[Value],
    on_row: &mut F,
) -> rusqlite::Result<u64>
where
    F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<()>,
{
    let mut statement = connection.prepare_cached(sql)?;
    if statement.column_count() == 0 {
        let changes = statement.execute(params_from_iter(params.iter()))?;
        return Ok(u64::try_from(changes).unwrap_or(u64::MAX));
    }
    let mut rows = statement.query(params_from_iter(params.iter()))?;
    while let Some(row) = rows.next()? {
        on_row(row)?;
    }
    Ok(0)
}

/// Returns true when the first keyword of `sql` is `INSERT` or `REPLACE`.
fn is_insert(sql: &str) -> bool {
    let mut rest = sql.trim_start();
    loop {
        if let Some(comment) = rest.strip_prefix("--") {
            rest = comment.split_once('\n').map_or("", |(_, tail)| tail).trim_start();
        } else if let Some(comment) = rest.strip_prefix("/*") {
            rest = comment.split_once("*/").map_or("", |(_, tail)| tail).trim_start();
        } else {
            break;
        }
    }
    let keyword: String =
        rest.chars().take_while(char::is_ascii_alphabetic).collect::<String>().to_ascii_uppercase();
    matches!(keyword.as_str(), "INSERT" | "REPLACE")
}

/// Copies every column of `row` into owned values.
pub(crate) fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Vec<Value>> {
    let count = row.as_ref().column_count();
    let mut values = Vec::with_capacity(count);
    for index in 0 .. count {
        values.push(row.get::<_, Value>(index)?);
    }
    Ok(values)
}

/// Installs or removes the interrupting progress handler.
#[allow(clippy::let_unit_value, reason = "Handler registration has no failure to surface.")]
fn install_progress_handler(connection: &Connection, flag: Option<Arc<AtomicBool>>) {
    match flag {
        Some(flag) => {
            let _ = connection.progress_handler(
                PROGRESS_HANDLER_OPS,
                Some(move || flag.load(Ordering::Acquire)),
            );
        }
        None => {
            let _ = connection.progress_handler(0, None::<fn() -> bool>);
        }
    }
}
