// crates/quarry-core/src/transaction.rs
// ============================================================================
// Module: Transaction Model
// Description: Transaction states and pausable unit outcomes.
// Purpose: Describe the transaction state machine independent of backend.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A handle moves `Idle -> InTransaction -> Idle`; commit or rollback are the
//! only exits. Pausable transactions run caller-supplied units, and each unit
//! answers with a [`UnitOutcome`] telling the driver what to do next.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Transaction state of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// No transaction is open.
    Idle,
    /// A transaction is open.
    InTransaction,
}

/// Result of one unit of a pausable transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitOutcome {
    /// Run the next unit inside the current transaction.
    Continue,
    /// Commit now and run the next unit in a fresh transaction.
    Pause,
    /// Commit and finish the loop.
    Stop,
}

impl UnitOutcome {
    /// Returns true when the current transaction should be committed.
    #[must_use]
    pub const fn commits(self) -> bool {
        matches!(self, Self::Pause | Self::Stop)
    }
}
