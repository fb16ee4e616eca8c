// crates/quarry-store-sqlite/src/checkpoint.rs
// ============================================================================
// Module: Checkpoint
// Description: Passive and truncating write-ahead log checkpoints.
// Purpose: Move logged frames into the database file on demand.
// Dependencies: quarry-core, rusqlite
// ============================================================================

//! ## Overview
//! A passive checkpoint takes the write handle only when it is free and
//! never waits; a truncating checkpoint waits for the write handle and
//! reports `Busy` when readers keep the log from being reset. Checkpoint
//! failures are retryable and never register corruption.

// ============================================================================
// SECTION: Imports
// ============================================================================

use quarry_core::CheckpointMode;
use quarry_core::CheckpointReport;
use quarry_core::QuarryError;

use crate::database::Database;
use crate::handle::HandleKind;
use crate::sqlite::sqlite_error;

// ============================================================================
// SECTION: Database API
// ============================================================================

impl Database {
    /// Checkpoints the write-ahead log.
    ///
    /// # Errors
    ///
    /// Returns `Busy` when the write handle is taken (passive) or readers
    /// prevent a full truncate, or the engine error of the checkpoint.
    pub fn checkpoint(&self, mode: CheckpointMode) -> Result<CheckpointReport, QuarryError> {
        self.track(self.run_checkpoint(mode))
    }

    /// Executes the checkpoint pragma on the write handle.
    fn run_checkpoint(&self, mode: CheckpointMode) -> Result<CheckpointReport, QuarryError> {
        let handle = match mode {
            CheckpointMode::Passive => self.try_acquire(HandleKind::Write)?,
            CheckpointMode::Truncate => self.acquire(HandleKind::Write)?,
        };
        let sql = format!("PRAGMA wal_checkpoint({})", mode.pragma_value());
        let (busy, log_frames, checkpointed_frames) = handle
            .connection()
            .query_row(&sql, [], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
            })
            .map_err(|err| {
                handle.context().report_unregistered(sqlite_error(&err).with_sql(&sql))
            })?;
        drop(handle);
        if busy != 0 && mode == CheckpointMode::Truncate {
            return Err(self
                .shared()
                .context()
                .report_unregistered(QuarryError::busy("readers prevented a full checkpoint")));
        }
        tracing::debug!(
            path = %self.path_key(),
            mode = mode.pragma_value(),
            log_frames,
            checkpointed_frames,
            "checkpoint finished"
        );
        Ok(CheckpointReport {
            mode,
            log_frames,
            checkpointed_frames,
        })
    }
}
