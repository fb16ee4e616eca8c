// crates/quarry-core/src/cancellation.rs
// ============================================================================
// Module: Cancellation Signal
// Description: Shared cooperative cancellation flag.
// Purpose: Let one thread ask work running on another handle to stop.
// Dependencies: std
// ============================================================================

//! ## Overview
//! A [`CancellationSignal`] is a cheaply cloned flag. Clones share state: the
//! canceller keeps one clone and attaches another to a handle. Work polls the
//! flag at safe points; nothing ever blocks waiting on it. Once set, a signal
//! stays set.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use crate::error::QuarryError;

// ============================================================================
// SECTION: Signal
// ============================================================================

/// Shared cancellation flag.
///
/// # Invariants
/// - Transitions only from clear to set.
#[derive(Clone, Default)]
pub struct CancellationSignal {
    /// Shared flag.
    flag: Arc<AtomicBool>,
}

impl CancellationSignal {
    /// Creates a clear signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Fails with a cancellation error when the signal is set.
    ///
    /// # Errors
    ///
    /// Returns a [`QuarryError`] with code `Cancelled` when cancelled.
    pub fn checkpoint(&self) -> Result<(), QuarryError> {
        if self.is_cancelled() {
            return Err(QuarryError::cancelled("operation cancelled by signal"));
        }
        Ok(())
    }

    /// Returns true when both values share the same flag.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.flag, &other.flag)
    }

    /// Returns a shareable flag handle for engine hooks.
    #[must_use]
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

impl fmt::Debug for CancellationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSignal").field("cancelled", &self.is_cancelled()).finish()
    }
}
