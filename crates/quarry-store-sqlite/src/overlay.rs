// crates/quarry-store-sqlite/src/overlay.rs
// ============================================================================
// Module: Migration Overlay
// Description: Connection-local union views over tables still migrating.
// Purpose: Keep unmoved source rows visible through the destination table.
// Dependencies: rusqlite, tracing
// ============================================================================

//! ## Overview
//! While a migration mapping is unfinished, every connection of the database
//! shadows the destination table with a view of the same name in the `temp`
//! schema. `SQLite` resolves unqualified names in `temp` before `main`, so a
//! read of the destination sees the moved rows plus the rows still waiting
//! in the source. When the destination has a primary key that the source
//! shares, destination rows win over source rows with the same key.
//!
//! ## Writes
//! The view refuses writes at prepare time. On a write handle an insert is
//! retried with the view dropped for that one statement. An update or
//! delete first moves every remaining source row of that table into the
//! destination and then runs against the table itself; the view stays
//! dropped on that connection because nothing is left to union.
//!
//! ## Synchronization
//! The migration engine publishes the unfinished mappings together with a
//! version number. A handle compares versions before it runs a statement and
//! rebuilds its views when they differ. Source databases in other files are
//! attached under private aliases, and only outside transactions; a source
//! file that does not exist is never attached, so it is never created.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use rusqlite::Connection;
use rusqlite::params;

use crate::sqlite::quote_identifier;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Prefix of the schema aliases given to attached source databases.
const SOURCE_ALIAS_PREFIX: &str = "quarry_src_";

/// Savepoint wrapping the move of a whole source table.
const DRAIN_SAVEPOINT: &str = "quarry_overlay_drain";

// ============================================================================
// SECTION: Published Mappings
// ============================================================================

/// Unfinished mapping shared with every handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OverlayTable {
    /// Destination table in the main schema.
    pub(crate) table: String,
    /// Source database file; `None` when the source lives in `main`.
    pub(crate) source_database: Option<PathBuf>,
    /// Source table.
    pub(crate) source_table: String,
}

/// Versioned set of unfinished mappings of one database.
#[derive(Default)]
pub(crate) struct OverlayRegistry {
    /// Current version and mappings.
    state: Mutex<(u64, Arc<Vec<OverlayTable>>)>,
}

impl OverlayRegistry {
    /// Replaces the published mappings, bumping the version on change.
    pub(crate) fn publish(&self, tables: Vec<OverlayTable>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state.1 == tables {
            return;
        }
        state.0 = state.0.wrapping_add(1);
        state.1 = Arc::new(tables);
    }

    /// Returns the current version and mappings.
    pub(crate) fn snapshot(&self) -> (u64, Arc<Vec<OverlayTable>>) {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        (state.0, Arc::clone(&state.1))
    }
}

// ============================================================================
// SECTION: Connection State
// ============================================================================

/// View installed on one connection.
#[derive(Debug, Clone)]
pub(crate) struct InstalledView {
    /// Destination table the view shadows.
    table: String,
    /// Schema holding the source table.
    schema: String,
    /// Source table.
    source_table: String,
    /// Quoted columns shared by source and destination.
    shared_columns: String,
    /// Statement recreating the view.
    create_sql: String,
}

/// Column metadata read from `table_info`.
#[derive(Debug, Clone)]
struct ColumnInfo {
    /// Column name.
    name: String,
    /// Default value expression.
    default: Option<String>,
    /// Position in the primary key; zero when not part of it.
    key_position: i64,
}

/// Overlay state of one connection.
#[derive(Debug, Default)]
pub(crate) struct HandleOverlay {
    /// Published version the views were built from.
    synced: Option<u64>,
    /// Installed views keyed by lowercase destination name.
    views: BTreeMap<String, InstalledView>,
    /// Attached source files and their aliases.
    attached: BTreeMap<PathBuf, String>,
    /// Suffix of the next alias.
    next_alias: u32,
}

impl HandleOverlay {
    /// Forces a rebuild before the next statement.
    pub(crate) const fn invalidate(&mut self) {
        self.synced = None;
    }

    /// Returns true when any view is installed.
    pub(crate) fn has_views(&self) -> bool {
        !self.views.is_empty()
    }

    /// Returns the schema holding a source: `main` for local sources, or the
    /// alias of an attached file.
    pub(crate) fn source_schema(&self, source_database: Option<&Path>) -> Option<String> {
        match source_database {
            None => Some("main".to_string()),
            Some(path) => self.attached.get(path).cloned(),
        }
    }

    /// Brings the connection in line with the published mappings.
    ///
    /// Failures are logged and the version is still recorded, so a broken
    /// source is retried only after the mappings change again.
    pub(crate) fn sync(
        &mut self,
        connection: &Connection,
        registry: &OverlayRegistry,
        read_only: bool,
        path_key: &str,
    ) {
        let (version, tables) = registry.snapshot();
        if self.synced == Some(version) {
            return;
        }
        if tables.is_empty() && self.views.is_empty() && self.attached.is_empty() {
            self.synced = Some(version);
            return;
        }
        let in_transaction = !connection.is_autocommit();
        let outcome = with_writable_temp(connection, read_only, || {
            self.rebuild(connection, &tables, in_transaction, path_key)
        });
        match outcome {
            Ok(true) => self.synced = Some(version),
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(path = %path_key, error = %err, "migration overlay not installed");
                self.synced = Some(version);
            }
        }
    }

    /// Drops every view, adjusts attachments, and installs current views.
    ///
    /// Returns false when attachments could not be brought up to date.
    fn rebuild(
        &mut self,
        connection: &Connection,
        tables: &[OverlayTable],
        in_transaction: bool,
        path_key: &str,
    ) -> rusqlite::Result<bool> {
        for view in std::mem::take(&mut self.views).into_values() {
            connection
                .execute_batch(&format!("DROP VIEW IF EXISTS temp.{}", quote_identifier(&view.table)))?;
        }
        let wanted: BTreeSet<&Path> = tables
            .iter()
            .filter_map(|table| table.source_database.as_deref())
            .filter(|path| path.is_file())
            .collect();
        let mut complete = true;
        if in_transaction {
            complete = self.attached.keys().map(PathBuf::as_path).eq(wanted.iter().copied());
        } else {
            complete = self.detach_unwanted(connection, &wanted, path_key);
            for path in &wanted {
                if !self.attached.contains_key(*path) {
                    let alias = format!("{SOURCE_ALIAS_PREFIX}{}", self.next_alias);
                    self.next_alias = self.next_alias.wrapping_add(1);
                    connection.execute(
                        &format!("ATTACH DATABASE ?1 AS {alias}"),
                        params![path.to_string_lossy()],
                    )?;
                    self.attached.insert(path.to_path_buf(), alias);
                }
            }
        }
        for table in tables {
            let Some(schema) = self.source_schema(table.source_database.as_deref()) else {
                continue;
            };
            if let Some(view) = build_view(connection, table, &schema)? {
                connection.execute_batch(&view.create_sql)?;
                self.views.insert(view_key(&table.table), view);
            }
        }
        Ok(complete)
    }

    /// Detaches sources no mapping needs; a failed detach keeps its alias
    /// reserved so it is never attached twice.
    fn detach_unwanted(
        &mut self,
        connection: &Connection,
        wanted: &BTreeSet<&Path>,
        path_key: &str,
    ) -> bool {
        let stale: Vec<PathBuf> =
            self.attached.keys().filter(|path| !wanted.contains(path.as_path())).cloned().collect();
        let mut complete = true;
        for path in stale {
            let Some(alias) = self.attached.get(&path) else {
                continue;
            };
            match connection.execute_batch(&format!("DETACH DATABASE {alias}")) {
                Ok(()) => {
                    self.attached.remove(&path);
                }
                Err(err) => {
                    tracing::warn!(
                        path = %path_key,
                        alias = %alias,
                        error = %err,
                        "migration source not detached"
                    );
                    complete = false;
                }
            }
        }
        complete
    }

    /// Returns the key of the installed view a write was refused by.
    pub(crate) fn refused_view(&self, err: &rusqlite::Error) -> Option<String> {
        let text = err.to_string();
        let start = text.find("cannot modify ")? + "cannot modify ".len();
        let end = text[start ..].find(" because it is a view")? + start;
        let key = view_key(&text[start .. end]);
        self.views.contains_key(&key).then_some(key)
    }

    /// Drops the view `key` for one statement, returning it for
    /// [`HandleOverlay::restore`].
    pub(crate) fn suspend(
        &mut self,
        connection: &Connection,
        key: &str,
    ) -> rusqlite::Result<Option<InstalledView>> {
        let Some(view) = self.views.remove(key) else {
            return Ok(None);
        };
        if let Err(err) = connection
            .execute_batch(&format!("DROP VIEW IF EXISTS temp.{}", quote_identifier(&view.table)))
        {
            self.views.insert(key.to_string(), view);
            return Err(err);
        }
        Ok(Some(view))
    }

    /// Recreates a view dropped by [`HandleOverlay::suspend`].
    pub(crate) fn restore(&mut self, connection: &Connection, view: InstalledView, path_key: &str) {
        match connection.execute_batch(&view.create_sql) {
            Ok(()) => {
                self.views.insert(view_key(&view.table), view);
            }
            Err(err) => {
                tracing::warn!(
                    path = %path_key,
                    table = %view.table,
                    error = %err,
                    "migration view not restored"
                );
                self.invalidate();
            }
        }
    }

    /// Moves every remaining source row behind view `key` into the
    /// destination and drops the view.
    pub(crate) fn drain(
        &mut self,
        connection: &Connection,
        key: &str,
        path_key: &str,
    ) -> rusqlite::Result<()> {
        let Some(view) = self.views.remove(key) else {
            return Ok(());
        };
        let source = format!("{}.{}", view.schema, quote_identifier(&view.source_table));
        let destination = format!("main.{}", quote_identifier(&view.table));
        let columns = &view.shared_columns;
        let sql = format!(
            "SAVEPOINT {DRAIN_SAVEPOINT};
             INSERT OR IGNORE INTO {destination} ({columns}) SELECT {columns} FROM {source} \
             ORDER BY rowid;
             DELETE FROM {source};
             DROP VIEW IF EXISTS temp.{};
             RELEASE {DRAIN_SAVEPOINT};",
            quote_identifier(&view.table)
        );
        if let Err(err) = connection.execute_batch(&sql) {
            if let Err(rollback) = connection
                .execute_batch(&format!("ROLLBACK TO {DRAIN_SAVEPOINT}; RELEASE {DRAIN_SAVEPOINT};"))
            {
                tracing::debug!(path = %path_key, error = %rollback, "drain savepoint not rolled back");
            }
            self.views.insert(key.to_string(), view);
            return Err(err);
        }
        tracing::info!(
            path = %path_key,
            table = %view.table,
            source = %view.source_table,
            "migration source drained before a write"
        );
        Ok(())
    }

    /// Drops the view shadowing `table`, if any.
    pub(crate) fn release(&mut self, connection: &Connection, table: &str) -> rusqlite::Result<()> {
        if let Some(view) = self.views.remove(&view_key(table)) {
            connection
                .execute_batch(&format!("DROP VIEW IF EXISTS temp.{}", quote_identifier(&view.table)))?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the lookup key of a table name.
fn view_key(table: &str) -> String {
    table.to_ascii_lowercase()
}

/// Runs `body` with `query_only` lifted on read handles.
fn with_writable_temp<T>(
    connection: &Connection,
    read_only: bool,
    body: impl FnOnce() -> rusqlite::Result<T>,
) -> rusqlite::Result<T> {
    if !read_only {
        return body();
    }
    connection.execute_batch("PRAGMA query_only = OFF;")?;
    let outcome = body();
    connection.execute_batch("PRAGMA query_only = ON;")?;
    outcome
}

/// Reads the columns of `schema.table`; a missing table has none.
fn column_info(
    connection: &Connection,
    schema: &str,
    table: &str,
) -> rusqlite::Result<Vec<ColumnInfo>> {
    let mut statement =
        connection.prepare(&format!("PRAGMA {schema}.table_info({})", quote_identifier(table)))?;
    let columns: rusqlite::Result<Vec<ColumnInfo>> = statement
        .query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get(1)?,
                default: row.get(4)?,
                key_position: row.get(5)?,
            })
        })?
        .collect();
    columns
}

/// Builds the union view of one mapping, or `None` when nothing is left to
/// union.
fn build_view(
    connection: &Connection,
    table: &OverlayTable,
    schema: &str,
) -> rusqlite::Result<Option<InstalledView>> {
    let destination = column_info(connection, "main", &table.table)?;
    let source = column_info(connection, schema, &table.source_table)?;
    if destination.is_empty() || source.is_empty() {
        return Ok(None);
    }
    let quoted_source = quote_identifier(&table.source_table);
    let has_rows: bool = connection.query_row(
        &format!("SELECT EXISTS (SELECT 1 FROM {schema}.{quoted_source})"),
        [],
        |row| row.get(0),
    )?;
    if !has_rows {
        return Ok(None);
    }
    let shared = |column: &ColumnInfo| {
        source.iter().any(|candidate| candidate.name.eq_ignore_ascii_case(&column.name))
    };
    let shared_columns: Vec<String> = destination
        .iter()
        .filter(|column| shared(column))
        .map(|column| quote_identifier(&column.name))
        .collect();
    if shared_columns.is_empty() {
        return Ok(None);
    }

    let quoted_table = quote_identifier(&table.table);
    let destination_list =
        destination.iter().map(|column| quote_identifier(&column.name)).collect::<Vec<_>>();
    let source_list = destination
        .iter()
        .map(|column| {
            let quoted = quote_identifier(&column.name);
            if shared(column) {
                format!("quarry_source.{quoted}")
            } else {
                let default = column.default.as_deref().unwrap_or("NULL");
                format!("({default}) AS {quoted}")
            }
        })
        .collect::<Vec<_>>();
    let keys: Vec<&ColumnInfo> =
        destination.iter().filter(|column| column.key_position > 0).collect();
    let exclusion = if !keys.is_empty() && keys.iter().all(|column| shared(column)) {
        let matches = keys
            .iter()
            .map(|column| {
                let quoted = quote_identifier(&column.name);
                format!("quarry_dest.{quoted} IS quarry_source.{quoted}")
            })
            .collect::<Vec<_>>()
            .join(" AND ");
        format!(
            " WHERE NOT EXISTS (SELECT 1 FROM main.{quoted_table} AS quarry_dest WHERE {matches})"
        )
    } else {
        String::new()
    };
    let create_sql = format!(
        "CREATE TEMP VIEW {quoted_table} AS SELECT {} FROM main.{quoted_table} UNION ALL \
         SELECT {} FROM {schema}.{quoted_source} AS quarry_source{exclusion}",
        destination_list.join(", "),
        source_list.join(", ")
    );
    Ok(Some(InstalledView {
        table: table.table.clone(),
        schema: schema.to_string(),
        source_table: table.source_table.clone(),
        shared_columns: shared_columns.join(", "),
        create_sql,
    }))
}
