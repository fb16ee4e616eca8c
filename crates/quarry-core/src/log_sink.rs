// crates/quarry-core/src/log_sink.rs
// ============================================================================
// Module: JSON Error Log
// Description: Error observer that appends JSON lines to a writer.
// Purpose: Persist reported errors without a logging subscriber.
// Dependencies: serde_json, std
// ============================================================================

//! ## Overview
//! `JsonLineErrorObserver` writes one JSON object per reported error. Write
//! failures are counted rather than propagated, since observers cannot fail
//! the operation that reported the error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use serde_json::json;

use crate::error::QuarryError;
use crate::interfaces::ErrorObserver;

// ============================================================================
// SECTION: Log Observer
// ============================================================================

/// JSON-lines error log.
pub struct JsonLineErrorObserver<W: Write + Send> {
    /// Output writer for log records.
    writer: Mutex<W>,
    /// Records that could not be written.
    dropped: AtomicU64,
}

impl<W: Write + Send> JsonLineErrorObserver<W> {
    /// Creates a log writing to `writer`.
    pub const fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            dropped: AtomicU64::new(0),
        }
    }

    /// Returns the number of records that failed to write.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Consumes the log and returns the writer.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError`] when the writer mutex was poisoned.
    pub fn into_inner(self) -> Result<W, QuarryError> {
        self.writer.into_inner().map_err(|_| QuarryError::io("log writer mutex poisoned"))
    }

    /// Writes one record.
    fn write_record(&self, error: &QuarryError) -> Result<(), QuarryError> {
        let record = json!({
            "level": error.level(),
            "code": error.code(),
            "message": error.message(),
            "native_code": error.native_code(),
            "infos": error.infos(),
        });
        let mut guard =
            self.writer.lock().map_err(|_| QuarryError::io("log writer mutex poisoned"))?;
        serde_json::to_writer(&mut *guard, &record)
            .map_err(|err| QuarryError::io(err.to_string()))?;
        guard.write_all(b"\n").map_err(|err| QuarryError::io(err.to_string()))?;
        drop(guard);
        Ok(())
    }
}

impl<W: Write + Send> ErrorObserver for JsonLineErrorObserver<W> {
    fn on_error(&self, error: &QuarryError) {
        if self.write_record(error).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}
