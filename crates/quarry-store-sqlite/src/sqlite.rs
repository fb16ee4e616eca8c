// crates/quarry-store-sqlite/src/sqlite.rs
// ============================================================================
// Module: SQLite Helpers
// Description: Connection opening, pragmas, error mapping, and quoting.
// Purpose: Keep raw rusqlite plumbing in one place.
// Dependencies: quarry-core, rusqlite
// ============================================================================

//! ## Overview
//! Low-level helpers shared by the pool, the handles, and the maintenance
//! paths: opening connections with the configured pragmas, mapping `SQLite`
//! result codes onto the engine taxonomy, quoting identifiers, and validating
//! database paths.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use quarry_core::ErrorCode;
use quarry_core::QuarryError;
use rusqlite::Connection;
use rusqlite::OpenFlags;

use crate::config::EngineConfig;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Error Mapping
// ============================================================================

/// Maps a rusqlite error onto the engine taxonomy.
pub(crate) fn sqlite_error(err: &rusqlite::Error) -> QuarryError {
    let code = match err.sqlite_error_code() {
        Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked) => {
            ErrorCode::Busy
        }
        Some(
            rusqlite::ErrorCode::CannotOpen
            | rusqlite::ErrorCode::PermissionDenied
            | rusqlite::ErrorCode::AuthorizationForStatementDenied,
        ) => ErrorCode::CantOpen,
        Some(rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase) => {
            ErrorCode::Corrupted
        }
        Some(rusqlite::ErrorCode::OperationInterrupted) => ErrorCode::Cancelled,
        Some(rusqlite::ErrorCode::SystemIoFailure | rusqlite::ErrorCode::DiskFull) => {
            ErrorCode::Io
        }
        Some(rusqlite::ErrorCode::ApiMisuse) => ErrorCode::Misuse,
        _ => ErrorCode::Sql,
    };
    let error = QuarryError::new(code, err.to_string());
    match err {
        rusqlite::Error::SqliteFailure(inner, _) => error.with_native_code(inner.extended_code),
        _ => error,
    }
}

/// Maps a file system error onto the engine taxonomy.
pub(crate) fn io_error(err: &std::io::Error, action: &str, path: &Path) -> QuarryError {
    QuarryError::io(format!("{action} {}: {err}", path.display()))
}

// ============================================================================
// SECTION: Connections
// ============================================================================

/// Opens a read-write `SQLite` connection, creating the file when missing.
pub(crate) fn open_connection(path: &Path) -> Result<Connection, QuarryError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    Connection::open_with_flags(path, flags).map_err(|err| sqlite_error(&err))
}

/// Applies the configured pragmas to a fresh connection.
pub(crate) fn apply_pragmas(
    connection: &Connection,
    config: &EngineConfig,
) -> Result<(), QuarryError> {
    connection.busy_timeout(config.busy_timeout()).map_err(|err| sqlite_error(&err))?;
    let foreign_keys = if config.foreign_keys { "ON" } else { "OFF" };
    connection
        .execute_batch(&format!("PRAGMA foreign_keys = {foreign_keys};"))
        .map_err(|err| sqlite_error(&err))?;
    let _mode: String = connection
        .query_row(
            &format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()),
            [],
            |row| row.get(0),
        )
        .map_err(|err| sqlite_error(&err))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(|err| sqlite_error(&err))?;
    connection.set_prepared_statement_cache_capacity(config.statement_cache_capacity);
    Ok(())
}

// ============================================================================
// SECTION: SQL Text
// ============================================================================

/// Quotes an identifier for interpolation into SQL text.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Returns true for tables owned by `SQLite` itself.
pub(crate) fn is_internal_table(name: &str) -> bool {
    name.starts_with("sqlite_")
}

// ============================================================================
// SECTION: Paths
// ============================================================================

/// Validates database paths for safety limits.
pub(crate) fn validate_database_path(path: &Path) -> Result<(), QuarryError> {
    let path_string = path.display().to_string();
    if path_string.is_empty() {
        return Err(QuarryError::invalid("database path must be non-empty"));
    }
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(QuarryError::invalid("database path exceeds length limit"));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(QuarryError::invalid("database path contains an overlong component"));
        }
    }
    if path.is_dir() {
        return Err(QuarryError::invalid("database path must be a file, not a directory"));
    }
    Ok(())
}

/// Ensures the parent directory exists for a file path.
pub(crate) fn ensure_parent_dir(path: &Path) -> Result<(), QuarryError> {
    let Some(parent) = path.parent() else {
        return Err(QuarryError::cant_open("database path missing parent directory"));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| io_error(&err, "create directory", parent))
}

/// Returns the current Unix timestamp in milliseconds.
pub(crate) fn unix_millis() -> i64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}
