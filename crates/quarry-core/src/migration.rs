// crates/quarry-core/src/migration.rs
// ============================================================================
// Module: Migration Model
// Description: Migration mapping records and filter interface.
// Purpose: Describe where a destination table takes its rows from.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A [`MigrationFilter`] is consulted once per destination table. It fills a
//! [`MigrationUserInfo`] with the source table (and optionally a different
//! source database). The engine freezes the answer into a
//! [`MigrationBaseInfo`], which is what migration observers receive.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Filter request for one destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationUserInfo {
    /// Destination database path.
    database: String,
    /// Destination table.
    table: String,
    /// Source table chosen by the filter.
    source_table: Option<String>,
    /// Source database chosen by the filter; `None` means the same database.
    source_database: Option<String>,
}

impl MigrationUserInfo {
    /// Creates an unresolved request.
    #[must_use]
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
            source_table: None,
            source_database: None,
        }
    }

    /// Returns the destination database path.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Returns the destination table.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Sets the source table and optional source database.
    pub fn set_source(&mut self, table: impl Into<String>, database: Option<String>) {
        self.source_table = Some(table.into());
        self.source_database = database;
    }

    /// Returns the chosen source table.
    #[must_use]
    pub fn source_table(&self) -> Option<&str> {
        self.source_table.as_deref()
    }

    /// Returns the chosen source database.
    #[must_use]
    pub fn source_database(&self) -> Option<&str> {
        self.source_database.as_deref()
    }

    /// Freezes the request into a migration record.
    ///
    /// Returns `None` when the filter chose no source or mapped the table
    /// onto itself.
    #[must_use]
    pub fn into_base_info(self) -> Option<MigrationBaseInfo> {
        let source_table = self.source_table?;
        let source_database = self.source_database.unwrap_or_else(|| self.database.clone());
        if source_table == self.table && source_database == self.database {
            return None;
        }
        Some(MigrationBaseInfo {
            database: self.database,
            table: self.table,
            source_database,
            source_table,
        })
    }
}

/// Resolved migration mapping.
///
/// # Invariants
/// - Source and destination never name the same table of the same database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MigrationBaseInfo {
    /// Destination database path.
    pub database: String,
    /// Destination table.
    pub table: String,
    /// Source database path.
    pub source_database: String,
    /// Source table.
    pub source_table: String,
}

impl MigrationBaseInfo {
    /// Returns true when the source lives in another database file.
    #[must_use]
    pub fn is_cross_database(&self) -> bool {
        self.source_database != self.database
    }
}

/// Outcome of a migration step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStep {
    /// One bounded unit of work completed.
    Stepped,
    /// No migration work remains.
    Done,
}

// ============================================================================
// SECTION: Filter
// ============================================================================

/// Chooses the migration source for a destination table.
pub trait MigrationFilter: Send + Sync {
    /// Fills `info` with the source, or leaves it unset for a final table.
    fn filter(&self, info: &mut MigrationUserInfo);
}

impl<F> MigrationFilter for F
where
    F: Fn(&mut MigrationUserInfo) + Send + Sync,
{
    fn filter(&self, info: &mut MigrationUserInfo) {
        self(info);
    }
}
