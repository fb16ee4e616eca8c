// crates/quarry-store-sqlite/src/config.rs
// ============================================================================
// Module: Engine Configuration
// Description: Tunables for pools, pragmas, migration, and recovery.
// Purpose: Provide validated, serde-loadable engine settings.
// Dependencies: quarry-core, serde
// ============================================================================

//! ## Overview
//! [`EngineConfig`] gathers every tunable the engine reads: `SQLite` pragma
//! values applied to each new connection, pool limits and wait bounds, the
//! migration batch size, background driver intervals, and the retrieve scan
//! window. Every field has a serde default so partial TOML sections load.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use quarry_core::QuarryError;
use serde::Deserialize;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Upper bound accepted for any wait setting (ms).
const MAX_WAIT_MS: u64 = 10 * 60 * 1_000;
/// Upper bound for concurrently issued read handles.
pub const MAX_READERS: usize = 64;
/// Upper bound for rows moved by one migration step.
pub const MAX_MIGRATION_BATCH_ROWS: usize = 100_000;

// ============================================================================
// SECTION: Pragma Modes
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JournalMode {
    /// WAL journal mode (required for checkpoints to have effect).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl JournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

// ============================================================================
// SECTION: Engine Config
// ============================================================================

/// Engine tunables shared by every database opened with them.
///
/// # Invariants
/// - Counts and intervals are greater than zero (see [`EngineConfig::validate`]).
/// - `migration_batch_rows` bounds the rows moved per migration step; rows
///   move in ascending rowid order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Busy timeout applied to each connection (ms).
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: JournalMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SyncMode,
    /// Enables foreign key enforcement on each connection.
    #[serde(default = "default_foreign_keys")]
    pub foreign_keys: bool,
    /// Maximum concurrently issued read handles.
    #[serde(default = "default_max_readers")]
    pub max_readers: usize,
    /// Maximum wait for a free handle slot (ms).
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Maximum wait for issued handles to return when blockading (ms).
    #[serde(default = "default_blockade_drain_timeout_ms")]
    pub blockade_drain_timeout_ms: u64,
    /// Prepared statements cached per connection.
    #[serde(default = "default_statement_cache_capacity")]
    pub statement_cache_capacity: usize,
    /// Rows moved by one migration step.
    #[serde(default = "default_migration_batch_rows")]
    pub migration_batch_rows: usize,
    /// Delay between background migration steps (ms).
    #[serde(default = "default_auto_migration_interval_ms")]
    pub auto_migration_interval_ms: u64,
    /// Delay between background backup attempts (ms).
    #[serde(default = "default_auto_backup_interval_ms")]
    pub auto_backup_interval_ms: u64,
    /// Rowid span read per window while retrieving.
    #[serde(default = "default_retrieve_window_rows")]
    pub retrieve_window_rows: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout_ms(),
            journal_mode: JournalMode::default(),
            sync_mode: SyncMode::default(),
            foreign_keys: default_foreign_keys(),
            max_readers: default_max_readers(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            blockade_drain_timeout_ms: default_blockade_drain_timeout_ms(),
            statement_cache_capacity: default_statement_cache_capacity(),
            migration_batch_rows: default_migration_batch_rows(),
            auto_migration_interval_ms: default_auto_migration_interval_ms(),
            auto_backup_interval_ms: default_auto_backup_interval_ms(),
            retrieve_window_rows: default_retrieve_window_rows(),
        }
    }
}

impl EngineConfig {
    /// Validates limits and intervals.
    ///
    /// # Errors
    ///
    /// Returns an `Invalid` [`QuarryError`] naming the offending field.
    pub fn validate(&self) -> Result<(), QuarryError> {
        if self.max_readers == 0 || self.max_readers > MAX_READERS {
            return Err(QuarryError::invalid(format!(
                "max_readers must be between 1 and {MAX_READERS}"
            )));
        }
        if self.statement_cache_capacity == 0 {
            return Err(QuarryError::invalid(
                "statement_cache_capacity must be greater than zero",
            ));
        }
        if self.migration_batch_rows == 0 || self.migration_batch_rows > MAX_MIGRATION_BATCH_ROWS
        {
            return Err(QuarryError::invalid(format!(
                "migration_batch_rows must be between 1 and {MAX_MIGRATION_BATCH_ROWS}"
            )));
        }
        if self.retrieve_window_rows <= 0 {
            return Err(QuarryError::invalid("retrieve_window_rows must be greater than zero"));
        }
        for (field, value) in [
            ("busy_timeout_ms", self.busy_timeout_ms),
            ("acquire_timeout_ms", self.acquire_timeout_ms),
            ("blockade_drain_timeout_ms", self.blockade_drain_timeout_ms),
            ("auto_migration_interval_ms", self.auto_migration_interval_ms),
            ("auto_backup_interval_ms", self.auto_backup_interval_ms),
        ] {
            if value > MAX_WAIT_MS {
                return Err(QuarryError::invalid(format!(
                    "{field} must not exceed {MAX_WAIT_MS}"
                )));
            }
        }
        if self.auto_migration_interval_ms == 0 || self.auto_backup_interval_ms == 0 {
            return Err(QuarryError::invalid("driver intervals must be greater than zero"));
        }
        Ok(())
    }

    /// Returns the busy timeout as a duration.
    #[must_use]
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Returns the handle acquisition wait bound.
    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Returns the blockade drain wait bound.
    #[must_use]
    pub const fn blockade_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.blockade_drain_timeout_ms)
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default foreign key setting.
const fn default_foreign_keys() -> bool {
    true
}

/// Returns the default read handle cap.
const fn default_max_readers() -> usize {
    4
}

/// Returns the default handle acquisition wait (ms).
const fn default_acquire_timeout_ms() -> u64 {
    2_000
}

/// Returns the default blockade drain wait (ms).
const fn default_blockade_drain_timeout_ms() -> u64 {
    5_000
}

/// Returns the default prepared statement cache capacity.
const fn default_statement_cache_capacity() -> usize {
    32
}

/// Returns the default migration batch size.
const fn default_migration_batch_rows() -> usize {
    256
}

/// Returns the default background migration interval (ms).
const fn default_auto_migration_interval_ms() -> u64 {
    20
}

/// Returns the default background backup interval (ms).
const fn default_auto_backup_interval_ms() -> u64 {
    10 * 60 * 1_000
}

/// Returns the default retrieve window span.
const fn default_retrieve_window_rows() -> i64 {
    64
}
