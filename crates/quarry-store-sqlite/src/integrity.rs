// crates/quarry-store-sqlite/src/integrity.rs
// ============================================================================
// Module: Integrity
// Description: Integrity checks and the corruption registration of a path.
// Purpose: Detect corruption proactively and expose the registration.
// Dependencies: quarry-core, rusqlite, tracing
// ============================================================================

//! ## Overview
//! Corruption is registered per path in the process service. Registration
//! happens reactively whenever any handle reports `SQLITE_CORRUPT` or
//! `SQLITE_NOTADB`, and proactively through [`Database::check_integrity`].
//! Observers fire once per new registration. The registration is sticky
//! until an integrity check passes or a retrieve succeeds.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Instant;

use quarry_core::IntegrityReport;
use quarry_core::QuarryError;
use rusqlite::types::Value;

use crate::database::Database;

// ============================================================================
// SECTION: Database API
// ============================================================================

impl Database {
    /// Runs `PRAGMA quick_check` (when `quick`) or `PRAGMA integrity_check`.
    ///
    /// A failing check registers the path as corrupted; a passing one clears
    /// the registration.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError`] when the check cannot run at all. Engine
    /// corruption errors raised while running it also register the path.
    pub fn check_integrity(&self, quick: bool) -> Result<IntegrityReport, QuarryError> {
        self.track(self.run_integrity_check(quick))
    }

    /// Runs a quick check and returns whether the path is registered as
    /// corrupted afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError`] when the check fails for reasons other than
    /// corruption.
    pub fn check_if_corrupted(&self) -> Result<bool, QuarryError> {
        match self.check_integrity(true) {
            Ok(_) => Ok(self.is_already_corrupted()),
            Err(err) if err.is_corruption() => Ok(true),
            Err(err) => Err(err),
        }
    }

    /// Returns true when the path is registered as corrupted.
    #[must_use]
    pub fn is_already_corrupted(&self) -> bool {
        self.core().notifier().is_corrupted(self.path_key())
    }

    /// Executes the check on a read handle.
    fn run_integrity_check(&self, quick: bool) -> Result<IntegrityReport, QuarryError> {
        let mut handle = self.read_handle()?;
        let pragma = if quick { "PRAGMA quick_check" } else { "PRAGMA integrity_check" };
        let started = Instant::now();
        let rows = handle.query_rows(pragma, &[])?;
        drop(handle);
        let details: Vec<String> = rows
            .into_iter()
            .filter_map(|row| match row.into_iter().next() {
                Some(Value::Text(line)) => Some(line),
                _ => None,
            })
            .collect();
        let ok = details.len() == 1 && details.first().is_some_and(|line| line == "ok");
        let report = IntegrityReport {
            quick,
            ok,
            details: if ok { Vec::new() } else { details },
            duration_us: u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
        };
        if ok {
            self.core().notifier().clear_corrupted(self.path_key());
        } else {
            let summary = report.details.first().cloned().unwrap_or_default();
            self.shared()
                .context()
                .report(QuarryError::corrupted(format!("integrity check failed: {summary}")));
        }
        tracing::info!(
            path = %self.path_key(),
            quick,
            ok,
            duration_us = report.duration_us,
            "integrity check finished"
        );
        Ok(report)
    }
}
