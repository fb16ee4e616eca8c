// crates/quarry-core/src/maintenance.rs
// ============================================================================
// Module: Maintenance Model
// Description: Checkpoint, integrity, and backup value types.
// Purpose: Report maintenance results without exposing backend types.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Result records for whole-database maintenance: write-ahead log checkpoints,
//! integrity checks, and backup material refreshes, plus the table filter that
//! narrows what a backup covers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Checkpoint
// ============================================================================

/// Write-ahead log checkpoint strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointMode {
    /// Copy frames not pinned by readers; never waits.
    #[default]
    Passive,
    /// Copy every frame and truncate the log; may wait for the writer slot.
    Truncate,
}

impl CheckpointMode {
    /// Returns the `wal_checkpoint` pragma argument.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Passive => "PASSIVE",
            Self::Truncate => "TRUNCATE",
        }
    }
}

/// Checkpoint result counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointReport {
    /// Mode that ran.
    pub mode: CheckpointMode,
    /// Frames in the log, or -1 outside WAL mode.
    pub log_frames: i64,
    /// Frames copied into the database file, or -1 outside WAL mode.
    pub checkpointed_frames: i64,
}

impl CheckpointReport {
    /// Returns true when every logged frame reached the database file.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.log_frames == self.checkpointed_frames
    }
}

// ============================================================================
// SECTION: Integrity
// ============================================================================

/// Integrity check outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// True when the quick variant ran.
    pub quick: bool,
    /// True when the engine reported no problems.
    pub ok: bool,
    /// Problem descriptions reported by the engine.
    pub details: Vec<String>,
    /// Wall time spent, in microseconds.
    pub duration_us: u64,
}

// ============================================================================
// SECTION: Backup
// ============================================================================

/// Backup material refresh counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BackupReport {
    /// Table entries written or rewritten.
    pub tables_written: usize,
    /// Table entries left untouched because nothing changed.
    pub tables_unchanged: usize,
    /// Tables excluded by the backup filter.
    pub tables_filtered: usize,
}

/// Decides which tables a backup covers.
pub trait BackupFilter: Send + Sync {
    /// Returns true when `table` should be backed up.
    fn should_back_up(&self, table: &str) -> bool;
}

impl<F> BackupFilter for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn should_back_up(&self, table: &str) -> bool {
        self(table)
    }
}
