// crates/quarry-store-sqlite/src/backup.rs
// ============================================================================
// Module: Backup Material
// Description: Incremental schema, statistics, and row dump snapshots.
// Purpose: Record what a database contains so retrieval can size and
//          rebuild it even when the database file lost its schema.
// Dependencies: quarry-core, rusqlite, serde, serde_json, sha2, tracing
// ============================================================================

//! ## Overview
//! Backup material lives next to the database as `<path>.material`, itself
//! a `SQLite` file. It holds one entry per schema object: the creation SQL
//! and, for tables, the row count, largest rowid, column list, and a digest
//! of the table content. Every entry is sealed with a SHA-256 digest of its
//! canonical JSON form so a damaged entry is ignored rather than trusted.
//!
//! ## Row Dump
//! Each backed-up table also has its rows dumped into `material_rows`, one
//! JSON payload per row keyed by rowid (or by position for `WITHOUT ROWID`
//! tables). Each payload carries its own SHA-256 digest; retrieval skips
//! rows whose digest does not verify. The dump does not depend on the page
//! layout of the database file, so it survives damage to the schema page.
//!
//! ## Incremental Writes
//! An entry whose digest is unchanged is left alone unless the caller
//! forces a rewrite; only changed tables have their dump rewritten. Tables
//! rejected by the backup filter are excluded and their entries and rows
//! removed. Every query against the database names the `main` schema, so
//! connection-local views never leak into the material.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::atomic::Ordering;
use std::time::Duration;

use quarry_core::BackupFilter;
use quarry_core::BackupReport;
use quarry_core::QuarryError;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;
use rusqlite::types::Value;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::database::Database;
use crate::driver::BackgroundDriver;
use crate::files::with_suffix;
use crate::handle::HandleKind;
use crate::handle::InnerHandle;
use crate::handle::read_row;
use crate::sqlite::io_error;
use crate::sqlite::is_internal_table;
use crate::sqlite::quote_identifier;
use crate::sqlite::sqlite_error;
use crate::sqlite::unix_millis;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// File name suffix of the backup material.
pub(crate) const MATERIAL_SUFFIX: &str = ".material";

/// Layout version recorded in `material_meta`; other layouts are rebuilt.
const MATERIAL_FORMAT: &str = "2";

/// Metadata table of a material file.
const MATERIAL_META: &str = "
CREATE TABLE IF NOT EXISTS material_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// Entry and row tables of a material file.
const MATERIAL_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS material_entries (
    name TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    tbl_name TEXT NOT NULL,
    sql TEXT NOT NULL,
    row_count INTEGER NOT NULL,
    max_rowid INTEGER NOT NULL,
    without_rowid INTEGER NOT NULL,
    columns TEXT NOT NULL,
    content_digest TEXT NOT NULL,
    digest TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS material_rows (
    tbl_name TEXT NOT NULL,
    row_key INTEGER NOT NULL,
    payload TEXT NOT NULL,
    digest TEXT NOT NULL,
    PRIMARY KEY (tbl_name, row_key)
) WITHOUT ROWID;
";

// ============================================================================
// SECTION: Material Entries
// ============================================================================

/// One schema object recorded in the material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct MaterialEntry {
    /// Object name.
    pub(crate) name: String,
    /// Object kind: `table`, `index`, `view`, or `trigger`.
    pub(crate) kind: String,
    /// Table the object belongs to.
    pub(crate) table: String,
    /// Creation SQL.
    pub(crate) sql: String,
    /// Rows in the table at backup time; zero for other kinds.
    pub(crate) row_count: i64,
    /// Largest rowid at backup time; zero when unknown.
    pub(crate) max_rowid: i64,
    /// True for `WITHOUT ROWID` tables.
    pub(crate) without_rowid: bool,
    /// Columns of each dumped row, in order.
    pub(crate) columns: Vec<String>,
    /// Digest of the dumped rows; empty when the table has no dump.
    pub(crate) content_digest: String,
}

impl MaterialEntry {
    /// Returns true for table entries.
    pub(crate) fn is_table(&self) -> bool {
        self.kind == "table"
    }

    /// Returns true when the rows of this table were dumped.
    pub(crate) fn has_dump(&self) -> bool {
        self.is_table() && !self.content_digest.is_empty()
    }

    /// Returns the hex SHA-256 digest of the canonical JSON form.
    fn digest(&self) -> Result<String, QuarryError> {
        let bytes = serde_json::to_vec(self)
            .map_err(|err| QuarryError::invalid(format!("material entry encoding failed: {err}")))?;
        Ok(sha256_hex(&bytes))
    }
}

// ============================================================================
// SECTION: Dumped Rows
// ============================================================================

/// One column value of a dumped row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
enum StoredValue {
    /// SQL `NULL`.
    Null,
    /// 64-bit integer.
    Integer(i64),
    /// Bit pattern of a 64-bit float.
    Real(u64),
    /// UTF-8 text.
    Text(String),
    /// Hex-encoded bytes.
    Blob(String),
}

impl StoredValue {
    /// Captures a column value.
    fn capture(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Integer(value) => Self::Integer(value),
            Value::Real(value) => Self::Real(value.to_bits()),
            Value::Text(value) => Self::Text(value),
            Value::Blob(bytes) => Self::Blob(hex_encode(&bytes)),
        }
    }

    /// Restores the column value; `None` when the blob encoding is damaged.
    fn restore(self) -> Option<Value> {
        Some(match self {
            Self::Null => Value::Null,
            Self::Integer(value) => Value::Integer(value),
            Self::Real(bits) => Value::Real(f64::from_bits(bits)),
            Self::Text(value) => Value::Text(value),
            Self::Blob(hex) => Value::Blob(hex_decode(&hex)?),
        })
    }
}

/// One dumped row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredRow {
    /// Rowid of rowid tables.
    rowid: Option<i64>,
    /// Column values in [`MaterialEntry::columns`] order.
    values: Vec<StoredValue>,
}

/// Row restored from the dump: the optional rowid and the column values.
pub(crate) type RestoredRow = (Option<i64>, Vec<Value>);

/// Failure while dumping rows.
#[derive(Debug)]
enum DumpError {
    /// The database could not be read.
    Read(rusqlite::Error),
    /// The material could not be written.
    Write(QuarryError),
}

impl From<rusqlite::Error> for DumpError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Read(err)
    }
}

/// Returns the material path of a database path.
pub(crate) fn material_path(database: &Path) -> PathBuf {
    with_suffix(database, MATERIAL_SUFFIX)
}

/// Reads every entry whose digest verifies; damaged material yields what
/// could be read.
pub(crate) fn read_material(path: &Path) -> BTreeMap<String, MaterialEntry> {
    let mut entries = BTreeMap::new();
    if !path.is_file() {
        return entries;
    }
    let rows = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY).and_then(
        |connection| {
            let mut statement = connection.prepare(
                "SELECT name, kind, tbl_name, sql, row_count, max_rowid, without_rowid, columns, \
                 content_digest, digest FROM material_entries",
            )?;
            let rows = statement
                .query_map([], |row| {
                    let columns: String = row.get(7)?;
                    Ok((
                        MaterialEntry {
                            name: row.get(0)?,
                            kind: row.get(1)?,
                            table: row.get(2)?,
                            sql: row.get(3)?,
                            row_count: row.get(4)?,
                            max_rowid: row.get(5)?,
                            without_rowid: row.get(6)?,
                            columns: serde_json::from_str(&columns).unwrap_or_default(),
                            content_digest: row.get(8)?,
                        },
                        row.get::<_, String>(9)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>();
            rows
        },
    );
    let rows = match rows {
        Ok(rows) => rows,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "backup material unreadable");
            return entries;
        }
    };
    for (entry, digest) in rows {
        if entry.digest().is_ok_and(|expected| expected == digest) {
            entries.insert(entry.name.clone(), entry);
        } else {
            tracing::warn!(
                path = %path.display(),
                name = %entry.name,
                "backup material entry failed digest verification"
            );
        }
    }
    entries
}

/// Streams the dumped rows of `entry` into `sink`, in key order.
///
/// Rows whose digest or encoding does not verify are skipped; a read
/// failure of the material ends the stream. Returns the number of rows
/// skipped or lost.
///
/// # Errors
///
/// Returns the first error raised by `sink`.
pub(crate) fn replay_material_rows<S>(
    path: &Path,
    entry: &MaterialEntry,
    mut sink: S,
) -> Result<u64, QuarryError>
where
    S: FnMut(RestoredRow) -> Result<(), QuarryError>,
{
    let connection = match Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY) {
        Ok(connection) => connection,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "backup material unreadable");
            return Ok(0);
        }
    };
    let statement = connection.prepare(
        "SELECT payload, digest FROM material_rows WHERE tbl_name = ?1 ORDER BY row_key",
    );
    let mut statement = match statement {
        Ok(statement) => statement,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "backup material rows unreadable");
            return Ok(0);
        }
    };
    let Ok(mut rows) = statement.query(params![entry.name]) else {
        return Ok(0);
    };
    let mut skipped = 0_u64;
    loop {
        let row = match rows.next() {
            Ok(Some(row)) => row,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    table = %entry.name,
                    error = %err,
                    "backup material rows truncated"
                );
                skipped += 1;
                break;
            }
        };
        let restored = row
            .get::<_, String>(0)
            .ok()
            .zip(row.get::<_, String>(1).ok())
            .filter(|(payload, digest)| sha256_hex(payload.as_bytes()) == *digest)
            .and_then(|(payload, _)| serde_json::from_str::<StoredRow>(&payload).ok())
            .filter(|stored| stored.values.len() == entry.columns.len())
            .and_then(|stored| {
                let values =
                    stored.values.into_iter().map(StoredValue::restore).collect::<Option<Vec<_>>>()?;
                Some((stored.rowid, values))
            });
        match restored {
            Some(row) => sink(row)?,
            None => skipped += 1,
        }
    }
    Ok(skipped)
}

// ============================================================================
// SECTION: Database API
// ============================================================================

impl Database {
    /// Refreshes the backup material under a blockade.
    ///
    /// # Errors
    ///
    /// Returns `Busy` when the blockade cannot be taken, or the error raised
    /// while reading the schema or writing the material.
    pub fn backup(&self, force: bool) -> Result<BackupReport, QuarryError> {
        self.track(self.run_backup(force))
    }

    /// Installs or clears the table predicate applied by backups.
    pub fn filter_backup(&self, filter: Option<Arc<dyn BackupFilter>>) {
        self.shared().backup_filter().set(filter);
    }

    /// Starts or stops the background backup driver.
    ///
    /// The driver runs a non-forced backup every `auto_backup_interval_ms`
    /// when writes were committed since the last backup.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError`] when the driver thread cannot be spawned.
    pub fn enable_auto_backup(&self, enabled: bool) -> Result<(), QuarryError> {
        let mut drivers = self.shared().drivers().lock().unwrap_or_else(PoisonError::into_inner);
        if !enabled {
            let previous = drivers.backup.take();
            drop(drivers);
            drop(previous);
            return Ok(());
        }
        if drivers.backup.is_some() {
            return Ok(());
        }
        let weak = Arc::downgrade(self.shared());
        let interval = Duration::from_millis(self.config().auto_backup_interval_ms);
        let driver = BackgroundDriver::spawn("quarry-backup", interval, move || {
            let Some(shared) = weak.upgrade() else {
                return false;
            };
            let database = Database::from_shared(shared);
            let writes = database.shared().context().writes();
            if writes == database.shared().backup_mark().load(Ordering::Relaxed) {
                return true;
            }
            if let Err(err) = database.run_backup(false) {
                tracing::warn!(
                    path = %database.path().display(),
                    error = %err,
                    "background backup failed"
                );
            }
            true
        })?;
        drivers.backup = Some(driver);
        Ok(())
    }

    /// Collects the schema, dumps changed tables, and writes the material.
    fn run_backup(&self, force: bool) -> Result<BackupReport, QuarryError> {
        let writes = self.shared().context().writes();
        let guard = self.blockade()?;
        let mut handle = guard.handle(HandleKind::Read)?;
        let filter = self.shared().backup_filter().get();
        let (entries, filtered) = collect_entries(&mut handle, filter.as_deref())?;
        let path = material_path(self.path());
        let report = match write_material_recovering(&path, handle.connection(), &entries, force, filtered)
        {
            Ok(report) => report,
            Err(DumpError::Read(err)) => {
                return Err(handle.fail(sqlite_error(&err).with_operation("backup")));
            }
            Err(DumpError::Write(err)) => {
                return Err(self.shared().context().report_unregistered(err));
            }
        };
        drop(handle);
        drop(guard);
        self.shared().backup_mark().store(writes, Ordering::Relaxed);
        tracing::info!(
            path = %self.path_key(),
            written = report.tables_written,
            unchanged = report.tables_unchanged,
            filtered = report.tables_filtered,
            "backup material refreshed"
        );
        Ok(report)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads the schema, per-table statistics, and content digests, honoring
/// `filter`.
fn collect_entries(
    handle: &mut InnerHandle,
    filter: Option<&dyn BackupFilter>,
) -> Result<(Vec<MaterialEntry>, usize), QuarryError> {
    let rows = handle.query_rows(
        "SELECT type, name, tbl_name, sql FROM main.sqlite_master WHERE sql IS NOT NULL \
         ORDER BY type = 'table' DESC, rowid",
        &[],
    )?;
    let mut entries = Vec::new();
    let mut excluded = BTreeSet::new();
    for row in rows {
        let [Value::Text(kind), Value::Text(name), Value::Text(table), Value::Text(sql)] =
            row.as_slice()
        else {
            continue;
        };
        if is_internal_table(name) {
            continue;
        }
        if kind == "table" {
            if filter.is_some_and(|filter| !filter.should_back_up(name)) {
                excluded.insert(name.clone());
                continue;
            }
        } else if excluded.contains(table) {
            continue;
        }
        let mut entry = MaterialEntry {
            name: name.clone(),
            kind: kind.clone(),
            table: table.clone(),
            sql: sql.clone(),
            row_count: 0,
            max_rowid: 0,
            without_rowid: sql.to_ascii_uppercase().contains("WITHOUT ROWID"),
            columns: Vec::new(),
            content_digest: String::new(),
        };
        let is_virtual = sql.to_ascii_uppercase().starts_with("CREATE VIRTUAL");
        if entry.is_table() && !is_virtual {
            let quoted = quote_identifier(name);
            entry.row_count =
                handle.query_i64(&format!("SELECT count(*) FROM main.{quoted}"), &[])?.unwrap_or(0);
            if !entry.without_rowid {
                entry.max_rowid = handle
                    .query_i64(&format!("SELECT coalesce(max(rowid), 0) FROM main.{quoted}"), &[])?
                    .unwrap_or(0);
            }
            entry.columns = table_columns(handle, name)?;
            entry.content_digest = content_digest(handle, &entry)?;
        }
        entries.push(entry);
    }
    Ok((entries, excluded.len()))
}

/// Lists the column names of `main.table`.
fn table_columns(handle: &mut InnerHandle, table: &str) -> Result<Vec<String>, QuarryError> {
    let rows = handle
        .query_rows(&format!("PRAGMA main.table_info({})", quote_identifier(table)), &[])?;
    Ok(rows
        .into_iter()
        .filter_map(|row| match row.into_iter().nth(1) {
            Some(Value::Text(name)) => Some(name),
            _ => None,
        })
        .collect())
}

/// Digests every row of a table in dump order.
fn content_digest(handle: &mut InnerHandle, entry: &MaterialEntry) -> Result<String, QuarryError> {
    if entry.columns.is_empty() {
        return Ok(String::new());
    }
    let mut hasher = Sha256::new();
    let scanned = dump_rows(handle.connection(), entry, |row_key, payload, _| {
        hasher.update(row_key.to_le_bytes());
        hasher.update(payload.as_bytes());
        Ok(())
    });
    match scanned {
        Ok(()) => Ok(hex_encode(&hasher.finalize())),
        Err(DumpError::Read(err)) => Err(handle.fail(sqlite_error(&err).with_operation("backup"))),
        Err(DumpError::Write(err)) => Err(err),
    }
}

/// Streams the rows of `main.<entry>` as `(row_key, payload, digest)`.
fn dump_rows<S>(connection: &Connection, entry: &MaterialEntry, mut sink: S) -> Result<(), DumpError>
where
    S: FnMut(i64, &str, &str) -> Result<(), DumpError>,
{
    let column_list =
        entry.columns.iter().map(|column| quote_identifier(column)).collect::<Vec<_>>().join(", ");
    let quoted = quote_identifier(&entry.name);
    let select = if entry.without_rowid {
        format!("SELECT {column_list} FROM main.{quoted}")
    } else {
        format!("SELECT rowid, {column_list} FROM main.{quoted} ORDER BY rowid")
    };
    let mut statement = connection.prepare(&select)?;
    let mut rows = statement.query([])?;
    let mut position = 0_i64;
    while let Some(row) = rows.next()? {
        let mut values = read_row(row)?.into_iter();
        let rowid = if entry.without_rowid {
            None
        } else {
            match values.next() {
                Some(Value::Integer(rowid)) => Some(rowid),
                _ => None,
            }
        };
        let stored = StoredRow {
            rowid,
            values: values.map(StoredValue::capture).collect(),
        };
        let payload = serde_json::to_string(&stored).map_err(|err| {
            DumpError::Write(QuarryError::invalid(format!("row dump encoding failed: {err}")))
        })?;
        let digest = sha256_hex(payload.as_bytes());
        sink(rowid.unwrap_or(position), &payload, &digest)?;
        position = position.saturating_add(1);
    }
    Ok(())
}

/// Writes the material, recreating it once when the file itself is damaged.
fn write_material_recovering(
    path: &Path,
    source: &Connection,
    entries: &[MaterialEntry],
    force: bool,
    filtered: usize,
) -> Result<BackupReport, DumpError> {
    match write_material(path, source, entries, force, filtered) {
        Err(DumpError::Write(err)) if err.is_corruption() => {
            tracing::warn!(path = %path.display(), "recreating damaged backup material");
            std::fs::remove_file(path)
                .map_err(|io| DumpError::Write(io_error(&io, "remove damaged material", path)))?;
            write_material(path, source, entries, force, filtered)
        }
        other => other,
    }
}

/// Creates the material tables, rebuilding files of another layout.
fn prepare_material(connection: &Connection) -> rusqlite::Result<()> {
    connection.execute_batch(MATERIAL_META)?;
    let format: Option<String> = connection
        .query_row("SELECT value FROM material_meta WHERE key = 'format'", [], |row| row.get(0))
        .optional()?;
    if format.as_deref() != Some(MATERIAL_FORMAT) {
        connection.execute_batch(
            "DROP TABLE IF EXISTS material_entries; DROP TABLE IF EXISTS material_rows;",
        )?;
        connection.execute(
            "INSERT OR REPLACE INTO material_meta (key, value) VALUES ('format', ?1)",
            params![MATERIAL_FORMAT],
        )?;
    }
    connection.execute_batch(MATERIAL_SCHEMA)
}

/// Writes changed entries and their rows, and removes stale ones, in one
/// transaction.
fn write_material(
    path: &Path,
    source: &Connection,
    entries: &[MaterialEntry],
    force: bool,
    filtered: usize,
) -> Result<BackupReport, DumpError> {
    let material = |err: rusqlite::Error| DumpError::Write(sqlite_error(&err));
    let mut connection = Connection::open(path).map_err(material)?;
    prepare_material(&connection).map_err(material)?;
    let transaction = connection.transaction().map_err(material)?;
    let existing: HashMap<String, String> = {
        let mut statement =
            transaction.prepare("SELECT name, digest FROM material_entries").map_err(material)?;
        let rows = statement
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(material)?
            .collect::<Result<HashMap<_, _>, _>>()
            .map_err(material)?;
        rows
    };

    let mut report = BackupReport {
        tables_filtered: filtered,
        ..BackupReport::default()
    };
    for entry in entries {
        let digest = entry.digest().map_err(DumpError::Write)?;
        let unchanged = existing.get(&entry.name).is_some_and(|stored| *stored == digest);
        if unchanged && !force {
            if entry.is_table() {
                report.tables_unchanged += 1;
            }
            continue;
        }
        let columns = serde_json::to_string(&entry.columns).map_err(|err| {
            DumpError::Write(QuarryError::invalid(format!("material entry encoding failed: {err}")))
        })?;
        transaction
            .execute(
                "INSERT OR REPLACE INTO material_entries \
                 (name, kind, tbl_name, sql, row_count, max_rowid, without_rowid, columns, \
                 content_digest, digest) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    entry.name,
                    entry.kind,
                    entry.table,
                    entry.sql,
                    entry.row_count,
                    entry.max_rowid,
                    entry.without_rowid,
                    columns,
                    entry.content_digest,
                    digest
                ],
            )
            .map_err(material)?;
        if entry.is_table() {
            transaction
                .execute("DELETE FROM material_rows WHERE tbl_name = ?1", params![entry.name])
                .map_err(material)?;
            if entry.has_dump() {
                let mut insert = transaction
                    .prepare_cached(
                        "INSERT OR REPLACE INTO material_rows (tbl_name, row_key, payload, digest) \
                         VALUES (?1, ?2, ?3, ?4)",
                    )
                    .map_err(material)?;
                dump_rows(source, entry, |row_key, payload, digest| {
                    insert
                        .execute(params![entry.name, row_key, payload, digest])
                        .map(|_| ())
                        .map_err(material)
                })?;
            }
            report.tables_written += 1;
        }
    }

    let current: BTreeSet<&str> = entries.iter().map(|entry| entry.name.as_str()).collect();
    for name in existing.keys().filter(|name| !current.contains(name.as_str())) {
        transaction
            .execute("DELETE FROM material_entries WHERE name = ?1", params![name])
            .map_err(material)?;
        transaction
            .execute("DELETE FROM material_rows WHERE tbl_name = ?1", params![name])
            .map_err(material)?;
    }
    transaction
        .execute(
            "INSERT OR REPLACE INTO material_meta (key, value) VALUES ('updated_at', ?1)",
            params![unix_millis().to_string()],
        )
        .map_err(material)?;
    transaction.commit().map_err(material)?;
    Ok(report)
}

/// Returns the lowercase hex SHA-256 digest of `bytes`.
fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(char::from(HEX[usize::from(byte >> 4)]));
        out.push(char::from(HEX[usize::from(byte & 0x0f)]));
    }
    out
}

/// Decodes a lowercase or uppercase hex string.
fn hex_decode(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    text.as_bytes()
        .chunks(2)
        .map(|pair| {
            let high = char::from(pair[0]).to_digit(16)?;
            let low = char::from(pair[1]).to_digit(16)?;
            u8::try_from(high * 16 + low).ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only assertions and helpers are permitted."
    )]

    use rusqlite::types::Value;

    use super::StoredValue;
    use super::hex_decode;
    use super::hex_encode;

    #[test]
    fn stored_values_restore_exactly() {
        let values = vec![
            Value::Null,
            Value::Integer(i64::MIN),
            Value::Real(f64::INFINITY),
            Value::Real(-0.0),
            Value::Text("naïve".to_string()),
            Value::Blob(vec![0x00, 0xff, 0x10]),
        ];
        for value in values {
            let restored = StoredValue::capture(value.clone()).restore().unwrap();
            match (&value, &restored) {
                (Value::Real(left), Value::Real(right)) => {
                    assert_eq!(left.to_bits(), right.to_bits());
                }
                _ => assert_eq!(value, restored),
            }
        }
    }

    #[test]
    fn damaged_hex_is_rejected() {
        assert_eq!(hex_decode(&hex_encode(b"quarry")).unwrap(), b"quarry".to_vec());
        assert!(hex_decode("abc").is_none());
        assert!(hex_decode("zz").is_none());
    }
}
