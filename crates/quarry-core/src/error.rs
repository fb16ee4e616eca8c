// crates/quarry-core/src/error.rs
// ============================================================================
// Module: Quarry Errors
// Description: Error taxonomy and immutable error records.
// Purpose: Give every engine failure a code, level, message, and context.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Every failure surfaced by the engine is a [`QuarryError`]: an immutable
//! record carrying an [`ErrorCode`], an [`ErrorLevel`], a message, the native
//! engine code when one exists, and key/value context such as the database
//! path or SQL text. Records are built once with consuming `with_*` methods
//! and never mutated afterwards.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Info Keys
// ============================================================================

/// Well-known context keys attached to error records.
pub mod keys {
    /// Database path the error belongs to.
    pub const PATH: &str = "path";
    /// SQL text that was executing.
    pub const SQL: &str = "sql";
    /// Caller-assigned database tag.
    pub const TAG: &str = "tag";
    /// Engine operation that failed.
    pub const OPERATION: &str = "operation";
    /// Table involved in the failure.
    pub const TABLE: &str = "table";
    /// Handle identifier that reported the failure.
    pub const HANDLE: &str = "handle";
}

// ============================================================================
// SECTION: Codes and Levels
// ============================================================================

/// Error taxonomy shared by all engine components.
///
/// # Invariants
/// - `Busy` is the only code callers should treat as retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Pool contention, lock timeout, or blockade.
    Busy,
    /// The database file could not be opened.
    CantOpen,
    /// Engine-reported statement failure.
    Sql,
    /// Integrity failure or malformed database file.
    Corrupted,
    /// A cancellation signal was observed.
    Cancelled,
    /// File system failure during maintenance.
    Io,
    /// The API was used out of order.
    Misuse,
    /// Invalid configuration or argument.
    Invalid,
}

impl ErrorCode {
    /// Returns the stable label for this code.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Busy => "busy",
            Self::CantOpen => "cant_open",
            Self::Sql => "sql",
            Self::Corrupted => "corrupted",
            Self::Cancelled => "cancelled",
            Self::Io => "io",
            Self::Misuse => "misuse",
            Self::Invalid => "invalid",
        }
    }

    /// Returns the level used when a record does not override it.
    #[must_use]
    pub const fn default_level(self) -> ErrorLevel {
        match self {
            Self::Busy => ErrorLevel::Warning,
            Self::Cancelled => ErrorLevel::Notice,
            Self::Corrupted => ErrorLevel::Fatal,
            Self::CantOpen | Self::Sql | Self::Io | Self::Misuse | Self::Invalid => {
                ErrorLevel::Error
            }
        }
    }

    /// Returns true when the failing operation may succeed if retried.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Busy)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Severity attached to an error record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum ErrorLevel {
    /// Expected condition, not worth reporting.
    Ignore,
    /// Diagnostic detail.
    Debug,
    /// Notable but harmless condition.
    Notice,
    /// Degraded but recoverable condition.
    Warning,
    /// Operation failure.
    #[default]
    Error,
    /// Data integrity is at risk.
    Fatal,
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Ignore => "ignore",
            Self::Debug => "debug",
            Self::Notice => "notice",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fatal => "fatal",
        };
        f.write_str(label)
    }
}

// ============================================================================
// SECTION: Values
// ============================================================================

/// Context value attached to an error record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ErrorValue {
    /// Integer context value.
    Integer(i64),
    /// Floating point context value.
    Float(f64),
    /// Text context value.
    Text(String),
}

impl ErrorValue {
    /// Returns the text payload, if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            Self::Integer(_) | Self::Float(_) => None,
        }
    }

    /// Returns the integer payload, if this is an integer value.
    #[must_use]
    pub const fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            Self::Float(_) | Self::Text(_) => None,
        }
    }
}

impl From<i64> for ErrorValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for ErrorValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<String> for ErrorValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for ErrorValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

// ============================================================================
// SECTION: Error Record
// ============================================================================

/// Immutable engine error record.
///
/// # Invariants
/// - Fields are fixed after construction; `with_*` methods consume and return.
/// - `native_code` carries the `SQLite` extended result code when known.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("{code} error: {message}")]
pub struct QuarryError {
    /// Severity of the failure.
    level: ErrorLevel,
    /// Taxonomy code.
    code: ErrorCode,
    /// Human-readable description.
    message: String,
    /// Native engine result code.
    native_code: Option<i32>,
    /// Key/value context.
    infos: BTreeMap<String, ErrorValue>,
}

impl QuarryError {
    /// Creates an error with the default level for `code`.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            level: code.default_level(),
            code,
            message: message.into(),
            native_code: None,
            infos: BTreeMap::new(),
        }
    }

    /// Creates a busy error.
    #[must_use]
    pub fn busy(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Busy, message)
    }

    /// Creates a cant-open error.
    #[must_use]
    pub fn cant_open(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::CantOpen, message)
    }

    /// Creates a SQL error.
    #[must_use]
    pub fn sql(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Sql, message)
    }

    /// Creates a corruption error.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Corrupted, message)
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cancelled, message)
    }

    /// Creates an I/O error.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Io, message)
    }

    /// Creates a misuse error.
    #[must_use]
    pub fn misuse(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Misuse, message)
    }

    /// Creates an invalid-argument error.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Invalid, message)
    }

    /// Overrides the level.
    #[must_use]
    pub fn with_level(mut self, level: ErrorLevel) -> Self {
        self.level = level;
        self
    }

    /// Attaches the native engine result code.
    #[must_use]
    pub fn with_native_code(mut self, native_code: i32) -> Self {
        self.native_code = Some(native_code);
        self
    }

    /// Attaches a context value.
    #[must_use]
    pub fn with_info(mut self, key: &str, value: impl Into<ErrorValue>) -> Self {
        self.infos.insert(key.to_string(), value.into());
        self
    }

    /// Attaches the database path.
    #[must_use]
    pub fn with_path(self, path: &str) -> Self {
        self.with_info(keys::PATH, path)
    }

    /// Attaches the SQL text.
    #[must_use]
    pub fn with_sql(self, sql: &str) -> Self {
        self.with_info(keys::SQL, sql)
    }

    /// Attaches the operation name.
    #[must_use]
    pub fn with_operation(self, operation: &str) -> Self {
        self.with_info(keys::OPERATION, operation)
    }

    /// Returns the severity.
    #[must_use]
    pub const fn level(&self) -> ErrorLevel {
        self.level
    }

    /// Returns the taxonomy code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.code
    }

    /// Returns the message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the native engine code, when known.
    #[must_use]
    pub const fn native_code(&self) -> Option<i32> {
        self.native_code
    }

    /// Returns all context values.
    #[must_use]
    pub const fn infos(&self) -> &BTreeMap<String, ErrorValue> {
        &self.infos
    }

    /// Returns a single context value.
    #[must_use]
    pub fn info(&self, key: &str) -> Option<&ErrorValue> {
        self.infos.get(key)
    }

    /// Returns the attached database path.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.info(keys::PATH).and_then(ErrorValue::as_text)
    }

    /// Returns the attached SQL text.
    #[must_use]
    pub fn sql_text(&self) -> Option<&str> {
        self.info(keys::SQL).and_then(ErrorValue::as_text)
    }

    /// Returns true for corruption errors.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(self.code, ErrorCode::Corrupted)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only assertions are permitted."
    )]

    use super::*;

    #[test]
    fn default_levels_follow_code() {
        assert_eq!(QuarryError::busy("x").level(), ErrorLevel::Warning);
        assert_eq!(QuarryError::corrupted("x").level(), ErrorLevel::Fatal);
        assert_eq!(QuarryError::sql("x").level(), ErrorLevel::Error);
        assert_eq!(QuarryError::cancelled("x").level(), ErrorLevel::Notice);
    }

    #[test]
    fn infos_are_attached_by_builders() {
        let error = QuarryError::sql("no such table: t")
            .with_path("/tmp/a.db")
            .with_sql("SELECT * FROM t")
            .with_native_code(1)
            .with_info(keys::TAG, 7_i64);
        assert_eq!(error.path(), Some("/tmp/a.db"));
        assert_eq!(error.sql_text(), Some("SELECT * FROM t"));
        assert_eq!(error.native_code(), Some(1));
        assert_eq!(error.info(keys::TAG).and_then(ErrorValue::as_integer), Some(7));
        assert_eq!(error.to_string(), "sql error: no such table: t");
    }

    #[test]
    fn records_serialize_with_snake_case_codes() {
        let error = QuarryError::cant_open("unable to open").with_path("/x");
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["code"], "cant_open");
        assert_eq!(json["level"], "error");
        assert_eq!(json["infos"]["path"], "/x");
    }
}
