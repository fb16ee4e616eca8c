// crates/quarry-store-sqlite/src/recovery.rs
// ============================================================================
// Module: Deposit and Retrieve
// Description: Set aside damaged file sets and rebuild databases from them.
// Purpose: Recover as many rows as possible from corrupted databases.
// Dependencies: quarry-core, rusqlite, tracing
// ============================================================================

//! ## Overview
//! Depositing moves the main file, its sidecars, and the backup material
//! into a new generation directory under `<path>.deposited/` and leaves a
//! fresh empty database behind. Retrieving deposits the current file set
//! too, then rebuilds the database from every generation, newest first.
//!
//! ## Row Recovery
//! Each table of a generation is read with a rowid cursor: batches of
//! `retrieve_window_rows` rows starting at the rowid after the last one read,
//! so sparse rowids cost nothing. A batch that fails to read is retried as a
//! rowid range split in half until single rows remain; unreadable single rows
//! are skipped, and the cursor then seeks past the damage to the next
//! readable rowid. Rows are inserted with their original rowid using
//! `INSERT OR IGNORE`, so rows recovered from a newer generation win over
//! older copies. Source files are opened with `writable_schema` enabled,
//! which makes `SQLite` size a truncated file by its real length instead of
//! refusing it.
//!
//! ## Row Dump Fallback
//! When a table of a generation yields no readable rows, because the schema
//! page is damaged or the table's pages are, its rows are replayed from the
//! generation's backup material dump instead.
//!
//! ## Recovered Fraction
//! For each table of each generation the expected row count is the larger of
//! the material's recorded count and the rows actually read. The result is
//! the sum of rows read over the sum of expected rows, or 1.0 when nothing
//! was expected.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use quarry_core::QuarryError;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::params;
use rusqlite::types::Value;

use crate::backup::MaterialEntry;
use crate::backup::material_path;
use crate::backup::read_material;
use crate::backup::replay_material_rows;
use crate::database::Database;
use crate::files::data_files;
use crate::files::deposited_dir;
use crate::files::move_file;
use crate::handle::HandleKind;
use crate::handle::InnerHandle;
use crate::handle::read_row;
use crate::sqlite::io_error;
use crate::sqlite::is_internal_table;
use crate::sqlite::quote_identifier;
use crate::sqlite::unix_millis;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Schema row read from `sqlite_master`.
#[derive(Debug, Clone)]
struct SchemaObject {
    /// Object kind.
    kind: String,
    /// Object name.
    name: String,
    /// Creation SQL.
    sql: String,
}

/// How one table of a generation will be recovered.
#[derive(Debug, Clone, Default)]
struct TablePlan {
    /// Creation SQL, from the source schema or the material.
    sql: String,
    /// True when the table is present in the readable source schema.
    in_source: bool,
    /// True for `WITHOUT ROWID` tables.
    without_rowid: bool,
    /// Rows recorded by the material.
    material_rows: i64,
    /// Material entry holding a row dump of the table.
    dump: Option<MaterialEntry>,
}

/// Rows read and skipped while copying one table.
#[derive(Debug, Clone, Copy, Default)]
struct CopyStats {
    /// Rows read from the source.
    read: u64,
    /// Single-row windows that could not be read.
    skipped: u64,
    /// True when the table could not be read at all.
    unreadable: bool,
}

/// Monotonic progress reporter.
struct Progress<'a, F: FnMut(f64, f64)> {
    /// Caller callback receiving `(percentage, increment)`.
    callback: &'a mut F,
    /// Percentage reported so far.
    reported: f64,
}

impl<F: FnMut(f64, f64)> Progress<'_, F> {
    /// Advances by `increment`, never past 1.0.
    fn advance(&mut self, increment: f64) {
        let next = (self.reported + increment).min(1.0);
        let step = next - self.reported;
        if step > 0.0 {
            self.reported = next;
            (self.callback)(next, step);
        }
    }

    /// Reports completion.
    fn finish(&mut self) {
        if self.reported < 1.0 {
            let step = 1.0 - self.reported;
            self.reported = 1.0;
            (self.callback)(1.0, step);
        }
    }
}

// ============================================================================
// SECTION: Database API
// ============================================================================

impl Database {
    /// Moves the current file set into a new deposited generation and
    /// creates a fresh empty database.
    ///
    /// Returns false when there was no database file to deposit.
    ///
    /// # Errors
    ///
    /// Returns `Busy` when the blockade cannot be taken, or `Io` when the
    /// files cannot be moved.
    pub fn deposit(&self) -> Result<bool, QuarryError> {
        self.track(self.run_deposit())
    }

    /// Rebuilds the database from every deposited generation.
    ///
    /// `on_progress` receives `(percentage, increment)`; percentages rise
    /// monotonically and end at 1.0. Returns the recovered fraction.
    ///
    /// # Errors
    ///
    /// Returns `Busy` when the blockade cannot be taken, `Io` when files
    /// cannot be moved, or the error raised while writing recovered rows.
    pub fn retrieve<F>(&self, mut on_progress: F) -> Result<f64, QuarryError>
    where
        F: FnMut(f64, f64),
    {
        self.track(self.run_retrieve(&mut on_progress))
    }

    /// Deletes every deposited generation.
    ///
    /// # Errors
    ///
    /// Returns `Busy` when the blockade cannot be taken, or `Io` when the
    /// directory cannot be removed.
    pub fn remove_deposited(&self) -> Result<(), QuarryError> {
        self.track(self.run_remove_deposited())
    }

    /// Returns true when at least one deposited generation exists.
    #[must_use]
    pub fn contains_deposited(&self) -> bool {
        list_generations(&deposited_dir(self.path())).is_ok_and(|generations| !generations.is_empty())
    }

    /// Deposits under a blockade.
    fn run_deposit(&self) -> Result<bool, QuarryError> {
        let guard = self.blockade()?;
        self.purge();
        let deposited = self.deposit_files()?;
        if deposited {
            drop(guard.handle(HandleKind::Write)?);
            tracing::info!(path = %self.path_key(), "database deposited");
        }
        Ok(deposited)
    }

    /// Removes the deposited directory under a blockade.
    fn run_remove_deposited(&self) -> Result<(), QuarryError> {
        let guard = self.blockade()?;
        let directory = deposited_dir(self.path());
        if directory.exists() {
            fs::remove_dir_all(&directory).map_err(|err| {
                self.shared()
                    .context()
                    .report_unregistered(io_error(&err, "remove deposited", &directory))
            })?;
            tracing::info!(path = %self.path_key(), "deposited generations removed");
        }
        drop(guard);
        Ok(())
    }

    /// Moves the current file set into a new generation directory.
    ///
    /// The caller holds the blockade and has purged idle connections.
    fn deposit_files(&self) -> Result<bool, QuarryError> {
        if !self.path().is_file() {
            return Ok(false);
        }
        let root = deposited_dir(self.path());
        let stamp = unix_millis();
        let mut sequence = 0_u32;
        let generation = loop {
            let candidate = root.join(format!("{stamp:020}-{sequence:04}"));
            if !candidate.exists() {
                break candidate;
            }
            sequence += 1;
        };
        let moved = fs::create_dir_all(&generation)
            .map_err(|err| io_error(&err, "create deposit directory", &generation))
            .and_then(|()| {
                for file in data_files(self.path()).iter().filter(|file| file.exists()) {
                    if let Some(name) = file.file_name() {
                        move_file(file, &generation.join(name))?;
                    }
                }
                Ok(())
            });
        moved.map_err(|err| {
            self.shared().context().report_unregistered(err.with_operation("deposit"))
        })?;
        tracing::debug!(
            path = %self.path_key(),
            generation = %generation.display(),
            "file set deposited"
        );
        Ok(true)
    }

    /// Deposits the current files and rebuilds from every generation.
    fn run_retrieve<F>(&self, on_progress: &mut F) -> Result<f64, QuarryError>
    where
        F: FnMut(f64, f64),
    {
        let guard = self.blockade()?;
        self.purge();
        self.deposit_files()?;
        let generations = list_generations(&deposited_dir(self.path())).map_err(|err| {
            self.shared().context().report_unregistered(err.with_operation("retrieve"))
        })?;
        let mut progress = Progress {
            callback: on_progress,
            reported: 0.0,
        };
        let mut target = guard.handle(HandleKind::Write)?;
        let share = 1.0 / count_as_f64(generations.len());
        let mut recovered = 0_u64;
        let mut expected = 0_u64;
        let mut schema_objects = Vec::new();
        let window = self.config().retrieve_window_rows;

        for generation in &generations {
            let Some(file_name) = self.path().file_name() else {
                break;
            };
            let source_path = generation.join(file_name);
            let material_file = material_path(&source_path);
            let material = read_material(&material_file);
            let source = open_source(&source_path);
            let source_schema = source.as_ref().map(read_schema).unwrap_or_default();
            let plans = plan_tables(&source_schema, &material);
            schema_objects.extend(secondary_objects(&source_schema, &material));

            let per_table = share / count_as_f64(plans.len());
            if plans.is_empty() {
                progress.advance(share);
            }
            for (table, plan) in &plans {
                let mut stats = match &source {
                    Some(source) if plan.in_source => {
                        copy_table(source, &mut target, table, plan, window)?
                    }
                    _ => {
                        ensure_table(&mut target, table, &plan.sql)?;
                        CopyStats {
                            unreadable: true,
                            ..CopyStats::default()
                        }
                    }
                };
                if stats.read == 0
                    && (stats.unreadable || stats.skipped > 0)
                    && let Some(entry) = &plan.dump
                {
                    let replayed = replay_dump(&material_file, &mut target, table, entry)?;
                    tracing::info!(
                        path = %self.path_key(),
                        table = %table,
                        rows = replayed.read,
                        damaged = replayed.skipped,
                        "rows replayed from backup material"
                    );
                    stats.read = replayed.read;
                    stats.skipped = stats.skipped.saturating_add(replayed.skipped);
                }
                let recorded = u64::try_from(plan.material_rows).unwrap_or(0);
                recovered = recovered.saturating_add(stats.read);
                expected = expected.saturating_add(recorded.max(stats.read));
                if stats.skipped > 0 {
                    tracing::warn!(
                        path = %self.path_key(),
                        table = %table,
                        skipped = stats.skipped,
                        "skipped unreadable rows during retrieve"
                    );
                }
                progress.advance(per_table);
            }
        }

        for sql in &schema_objects {
            if let Err(err) = target.connection().execute_batch(sql) {
                tracing::debug!(path = %self.path_key(), error = %err, "schema object not replayed");
            }
        }
        drop(target);
        progress.finish();
        drop(guard);

        let fraction = if expected == 0 {
            1.0
        } else {
            ratio(recovered, expected).clamp(0.0, 1.0)
        };
        self.core().notifier().clear_corrupted(self.path_key());
        tracing::info!(
            path = %self.path_key(),
            generations = generations.len(),
            recovered,
            expected,
            fraction,
            "database retrieved"
        );
        Ok(fraction)
    }
}

// ============================================================================
// SECTION: Generations
// ============================================================================

/// Lists generation directories, newest first.
fn list_generations(root: &Path) -> Result<Vec<PathBuf>, QuarryError> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut generations = Vec::new();
    for entry in fs::read_dir(root).map_err(|err| io_error(&err, "read directory", root))? {
        let entry = entry.map_err(|err| io_error(&err, "read directory", root))?;
        let path = entry.path();
        if path.is_dir() {
            generations.push(path);
        }
    }
    generations.sort();
    generations.reverse();
    Ok(generations)
}

// ============================================================================
// SECTION: Source Access
// ============================================================================

/// Opens a deposited file for salvage reads.
fn open_source(path: &Path) -> Option<Connection> {
    if !path.is_file() {
        return None;
    }
    let opened = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_WRITE).and_then(
        |connection| {
            connection.execute_batch("PRAGMA writable_schema = ON; PRAGMA query_only = ON;")?;
            Ok(connection)
        },
    );
    match opened {
        Ok(connection) => Some(connection),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "deposited file unreadable");
            None
        }
    }
}

/// Reads the schema of a source; an unreadable schema yields nothing.
fn read_schema(source: &Connection) -> Vec<SchemaObject> {
    let objects = source
        .prepare("SELECT type, name, sql FROM sqlite_master WHERE sql IS NOT NULL ORDER BY rowid")
        .and_then(|mut statement| {
            let objects = statement
                .query_map([], |row| {
                    Ok(SchemaObject {
                        kind: row.get(0)?,
                        name: row.get(1)?,
                        sql: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>();
            objects
        });
    match objects {
        Ok(objects) => objects.into_iter().filter(|object| !is_internal_table(&object.name)).collect(),
        Err(err) => {
            tracing::warn!(error = %err, "deposited schema unreadable");
            Vec::new()
        }
    }
}

/// Merges source tables with the tables recorded in the material.
fn plan_tables(
    schema: &[SchemaObject],
    material: &BTreeMap<String, MaterialEntry>,
) -> BTreeMap<String, TablePlan> {
    let mut plans = BTreeMap::new();
    for object in schema.iter().filter(|object| object.kind == "table") {
        let upper = object.sql.to_ascii_uppercase();
        if upper.starts_with("CREATE VIRTUAL") {
            continue;
        }
        plans.insert(
            object.name.clone(),
            TablePlan {
                sql: object.sql.clone(),
                in_source: true,
                without_rowid: upper.contains("WITHOUT ROWID"),
                ..TablePlan::default()
            },
        );
    }
    for entry in material.values().filter(|entry| entry.is_table()) {
        if entry.sql.to_ascii_uppercase().starts_with("CREATE VIRTUAL") {
            continue;
        }
        let plan = plans.entry(entry.name.clone()).or_insert_with(|| TablePlan {
            sql: entry.sql.clone(),
            without_rowid: entry.without_rowid,
            ..TablePlan::default()
        });
        plan.material_rows = entry.row_count;
        plan.dump = entry.has_dump().then(|| entry.clone());
    }
    plans
}

/// Returns index, view, and trigger SQL to replay after the tables.
fn secondary_objects(
    schema: &[SchemaObject],
    material: &BTreeMap<String, MaterialEntry>,
) -> Vec<String> {
    let mut objects: BTreeMap<String, String> = material
        .values()
        .filter(|entry| !entry.is_table())
        .map(|entry| (entry.name.clone(), entry.sql.clone()))
        .collect();
    for object in schema.iter().filter(|object| object.kind != "table") {
        objects.insert(object.name.clone(), object.sql.clone());
    }
    objects.into_values().collect()
}

// ============================================================================
// SECTION: Row Copy
// ============================================================================

/// Creates `table` in the target when missing.
fn ensure_table(target: &mut InnerHandle, table: &str, sql: &str) -> Result<(), QuarryError> {
    if !target.table_exists(table)? {
        target.execute(sql)?;
    }
    Ok(())
}

/// Lists the column names of a source table.
fn source_columns(source: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut statement =
        source.prepare(&format!("PRAGMA table_info({})", quote_identifier(table)))?;
    let columns = statement.query_map([], |row| row.get::<_, String>(1))?.collect();
    columns
}

/// Copies every readable row of `table` into the target.
fn copy_table(
    source: &Connection,
    target: &mut InnerHandle,
    table: &str,
    plan: &TablePlan,
    window: i64,
) -> Result<CopyStats, QuarryError> {
    ensure_table(target, table, &plan.sql)?;
    let columns = match source_columns(source, table) {
        Ok(columns) if !columns.is_empty() => columns,
        Ok(_) | Err(_) => {
            return Ok(CopyStats {
                unreadable: true,
                ..CopyStats::default()
            });
        }
    };
    let quoted_table = quote_identifier(table);
    let column_list =
        columns.iter().map(|column| quote_identifier(column)).collect::<Vec<_>>().join(", ");
    let mut stats = CopyStats::default();

    target.run_transaction(|target| {
        if plan.without_rowid {
            let select = format!("SELECT {column_list} FROM {quoted_table}");
            let insert = format!(
                "INSERT OR IGNORE INTO {quoted_table} ({column_list}) VALUES ({})",
                placeholders(columns.len())
            );
            scan_all(source, &select, &mut stats, |row| target.execute_with(&insert, &row))?;
            return Ok(true);
        }

        let insert = format!(
            "INSERT OR IGNORE INTO {quoted_table} (rowid, {column_list}) VALUES ({})",
            placeholders(columns.len() + 1)
        );
        let queries = RowidQueries {
            batch: format!(
                "SELECT rowid, {column_list} FROM {quoted_table} WHERE rowid >= ?1 \
                 ORDER BY rowid LIMIT ?2"
            ),
            range: format!(
                "SELECT rowid, {column_list} FROM {quoted_table} WHERE rowid BETWEEN ?1 AND ?2 \
                 ORDER BY rowid"
            ),
            seek: format!(
                "SELECT rowid FROM {quoted_table} WHERE rowid >= ?1 ORDER BY rowid LIMIT 1"
            ),
        };
        let window = window.max(1);
        let mut cursor = Some(
            query_bound(source, &format!("SELECT min(rowid) FROM {quoted_table}"))
                .unwrap_or(i64::MIN),
        );
        while let Some(start) = cursor {
            match read_batch(source, &queries.batch, start, window) {
                Ok(rows) => {
                    let full = i64::try_from(rows.len()).is_ok_and(|count| count >= window);
                    let last = rows.last().and_then(|row| match row.first() {
                        Some(Value::Integer(rowid)) => Some(*rowid),
                        _ => None,
                    });
                    for row in rows {
                        target.execute_with(&insert, &row)?;
                        stats.read += 1;
                    }
                    cursor = match last {
                        Some(last) if full => last.checked_add(1),
                        _ => None,
                    };
                }
                Err(_) => {
                    let end = start.saturating_add(window - 1);
                    scan_range(source, &queries.range, start, end, &mut stats, &mut |row| {
                        target.execute_with(&insert, &row)
                    })?;
                    cursor = end.checked_add(1).and_then(|next| {
                        next_readable(source, &queries.seek, next, window, &mut stats)
                    });
                }
            }
        }
        Ok(true)
    })?;
    Ok(stats)
}

/// Statements driving the rowid cursor of one table.
struct RowidQueries {
    /// Up to `?2` rows from rowid `?1` on.
    batch: String,
    /// Rows with rowid in `?1 ..= ?2`.
    range: String,
    /// First rowid at or after `?1`.
    seek: String,
}

/// Reads one integer bound, treating failure as unknown.
fn query_bound(source: &Connection, sql: &str) -> Option<i64> {
    source.query_row(sql, [], |row| row.get::<_, Option<i64>>(0)).ok().flatten()
}

/// Reads up to `limit` rows starting at rowid `start`, or fails.
fn read_batch(
    source: &Connection,
    select: &str,
    start: i64,
    limit: i64,
) -> rusqlite::Result<Vec<Vec<Value>>> {
    let mut statement = source.prepare_cached(select)?;
    let mut rows = statement.query(params![start, limit])?;
    let mut values = Vec::new();
    while let Some(row) = rows.next()? {
        values.push(read_row(row)?);
    }
    Ok(values)
}

/// Returns whether seeking from rowid `from` succeeds, and the rowid found.
fn seek(source: &Connection, select: &str, from: i64) -> rusqlite::Result<Option<i64>> {
    let mut statement = source.prepare_cached(select)?;
    let mut rows = statement.query(params![from])?;
    match rows.next()? {
        Some(row) => row.get(0).map(Some),
        None => Ok(None),
    }
}

/// Finds the smallest start at or after `from` from which the table can be
/// read again, or `None` when nothing readable remains.
///
/// Seeks forward in doubling strides until one succeeds, then narrows the
/// gap between the last failing and the first succeeding start.
fn next_readable(
    source: &Connection,
    select: &str,
    from: i64,
    window: i64,
    stats: &mut CopyStats,
) -> Option<i64> {
    let mut failing = match seek(source, select, from) {
        Ok(found) => return found.map(|_| from),
        Err(_) => from,
    };
    let mut stride = window.unsigned_abs().max(1);
    let mut succeeding = loop {
        let candidate = failing.checked_add_unsigned(stride)?;
        match seek(source, select, candidate) {
            Ok(_) => break candidate,
            Err(_) => {
                failing = candidate;
                stride = stride.saturating_mul(2);
            }
        }
    };
    while succeeding.abs_diff(failing) > 1 {
        let middle = failing.saturating_add_unsigned(succeeding.abs_diff(failing) / 2);
        match seek(source, select, middle) {
            Ok(_) => succeeding = middle,
            Err(_) => failing = middle,
        }
    }
    stats.skipped += 1;
    match seek(source, select, succeeding) {
        Ok(Some(_)) => Some(succeeding),
        Ok(None) | Err(_) => None,
    }
}

/// Reads rows until the first failure.
fn scan_all<S>(
    source: &Connection,
    select: &str,
    stats: &mut CopyStats,
    mut sink: S,
) -> Result<(), QuarryError>
where
    S: FnMut(Vec<Value>) -> Result<(), QuarryError>,
{
    let Ok(mut statement) = source.prepare(select) else {
        stats.unreadable = true;
        return Ok(());
    };
    let Ok(mut rows) = statement.query([]) else {
        stats.unreadable = true;
        return Ok(());
    };
    loop {
        match rows.next() {
            Ok(Some(row)) => match read_row(row) {
                Ok(values) => {
                    sink(values)?;
                    stats.read += 1;
                }
                Err(_) => {
                    stats.skipped += 1;
                    break;
                }
            },
            Ok(None) => break,
            Err(_) => {
                stats.skipped += 1;
                break;
            }
        }
    }
    Ok(())
}

/// Copies rows with `lower <= rowid <= upper`, splitting failed ranges.
fn scan_range<S>(
    source: &Connection,
    select: &str,
    lower: i64,
    upper: i64,
    stats: &mut CopyStats,
    sink: &mut S,
) -> Result<(), QuarryError>
where
    S: FnMut(Vec<Value>) -> Result<(), QuarryError>,
{
    if upper < lower {
        return Ok(());
    }
    match read_range(source, select, lower, upper) {
        Ok(rows) => {
            for row in rows {
                sink(row)?;
                stats.read += 1;
            }
            Ok(())
        }
        Err(_) if upper == lower => {
            stats.skipped += 1;
            Ok(())
        }
        Err(_) => {
            let middle = lower.saturating_add_unsigned(upper.abs_diff(lower) / 2);
            scan_range(source, select, lower, middle, stats, sink)?;
            scan_range(source, select, middle + 1, upper, stats, sink)
        }
    }
}

/// Reads a whole rowid range or fails.
fn read_range(
    source: &Connection,
    select: &str,
    lower: i64,
    upper: i64,
) -> rusqlite::Result<Vec<Vec<Value>>> {
    let mut statement = source.prepare_cached(select)?;
    let mut rows = statement.query(params![lower, upper])?;
    let mut values = Vec::new();
    while let Some(row) = rows.next()? {
        values.push(read_row(row)?);
    }
    Ok(values)
}

/// Replays the dumped rows of `table` from the backup material.
fn replay_dump(
    material: &Path,
    target: &mut InnerHandle,
    table: &str,
    entry: &MaterialEntry,
) -> Result<CopyStats, QuarryError> {
    let quoted_table = quote_identifier(table);
    let column_list =
        entry.columns.iter().map(|column| quote_identifier(column)).collect::<Vec<_>>().join(", ");
    let plain = format!(
        "INSERT OR IGNORE INTO {quoted_table} ({column_list}) VALUES ({})",
        placeholders(entry.columns.len())
    );
    let keyed = format!(
        "INSERT OR IGNORE INTO {quoted_table} (rowid, {column_list}) VALUES ({})",
        placeholders(entry.columns.len() + 1)
    );
    let mut stats = CopyStats::default();
    target.run_transaction(|target| {
        let skipped = replay_material_rows(material, entry, |(rowid, values)| {
            match rowid {
                Some(rowid) if !entry.without_rowid => {
                    let row: Vec<Value> =
                        std::iter::once(Value::Integer(rowid)).chain(values).collect();
                    target.execute_with(&keyed, &row)?;
                }
                _ => target.execute_with(&plain, &values)?,
            }
            stats.read += 1;
            Ok(())
        })?;
        stats.skipped = skipped;
        Ok(true)
    })?;
    Ok(stats)
}

/// Returns `?1, ?2, ...` for `count` parameters.
fn placeholders(count: usize) -> String {
    (1 ..= count).map(|index| format!("?{index}")).collect::<Vec<_>>().join(", ")
}

/// Returns `numerator / denominator` as a float.
#[allow(clippy::cast_precision_loss, reason = "Row counts stay far below 2^52.")]
fn ratio(numerator: u64, denominator: u64) -> f64 {
    numerator as f64 / denominator as f64
}

/// Returns a collection length as a float divisor, at least 1.
#[allow(clippy::cast_precision_loss, reason = "Table and generation counts are small.")]
fn count_as_f64(count: usize) -> f64 {
    count.max(1) as f64
}
