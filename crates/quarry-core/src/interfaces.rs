// crates/quarry-core/src/interfaces.rs
// ============================================================================
// Module: Observer Interfaces
// Description: Observer traits and the events they receive.
// Purpose: Decouple engine notifications from the code that consumes them.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! One trait per notification category. Every trait is implemented for
//! matching closures, so callers can register either a type or a closure.
//! Observers run synchronously on the thread that produced the event and must
//! not block on the database that notified them.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::error::QuarryError;
use crate::migration::MigrationBaseInfo;

// ============================================================================
// SECTION: Events
// ============================================================================

/// A statement about to run on a handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SqlTrace {
    /// Database tag.
    pub tag: i64,
    /// Database path.
    pub path: String,
    /// Handle identifier.
    pub handle_id: u64,
    /// Statement text.
    pub sql: String,
}

/// A statement that finished on a handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PerformanceTrace {
    /// Database tag.
    pub tag: i64,
    /// Database path.
    pub path: String,
    /// Handle identifier.
    pub handle_id: u64,
    /// Statement text.
    pub sql: String,
    /// Wall time spent executing.
    pub cost: Duration,
}

/// A database path newly registered as corrupted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorruptionEvent {
    /// Database path.
    pub path: String,
    /// Database tag at detection time.
    pub tag: i64,
}

/// Database lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// A database object was created for a path.
    Create,
    /// The database tag changed.
    SetTag,
    /// A new connection was opened.
    OpenHandle,
}

/// Lifecycle operation event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationEvent {
    /// Database path.
    pub path: String,
    /// Database tag.
    pub tag: i64,
    /// Operation performed.
    pub operation: Operation,
}

// ============================================================================
// SECTION: Observers
// ============================================================================

/// Receives statement timings.
pub trait PerformanceObserver: Send + Sync {
    /// Called after a statement finishes.
    fn on_performance(&self, trace: &PerformanceTrace);
}

/// Receives statement text.
pub trait SqlObserver: Send + Sync {
    /// Called before a statement runs.
    fn on_sql(&self, trace: &SqlTrace);
}

/// Receives reported errors.
pub trait ErrorObserver: Send + Sync {
    /// Called for every reported error.
    fn on_error(&self, error: &QuarryError);
}

/// Receives new corruption registrations.
pub trait CorruptionObserver: Send + Sync {
    /// Called once per new registration of a path.
    fn on_corrupted(&self, event: &CorruptionEvent);
}

/// Receives migration progress.
pub trait MigrationObserver: Send + Sync {
    /// Called after each completed step with its mapping, and once with
    /// `None` when no work remains.
    fn on_migrated(&self, database: &str, info: Option<&MigrationBaseInfo>);
}

/// Receives lifecycle operations.
pub trait OperationObserver: Send + Sync {
    /// Called when a lifecycle operation happens.
    fn on_operation(&self, event: &OperationEvent);
}

impl<F> PerformanceObserver for F
where
    F: Fn(&PerformanceTrace) + Send + Sync,
{
    fn on_performance(&self, trace: &PerformanceTrace) {
        self(trace);
    }
}

impl<F> SqlObserver for F
where
    F: Fn(&SqlTrace) + Send + Sync,
{
    fn on_sql(&self, trace: &SqlTrace) {
        self(trace);
    }
}

impl<F> ErrorObserver for F
where
    F: Fn(&QuarryError) + Send + Sync,
{
    fn on_error(&self, error: &QuarryError) {
        self(error);
    }
}

impl<F> CorruptionObserver for F
where
    F: Fn(&CorruptionEvent) + Send + Sync,
{
    fn on_corrupted(&self, event: &CorruptionEvent) {
        self(event);
    }
}

impl<F> MigrationObserver for F
where
    F: Fn(&str, Option<&MigrationBaseInfo>) + Send + Sync,
{
    fn on_migrated(&self, database: &str, info: Option<&MigrationBaseInfo>) {
        self(database, info);
    }
}

impl<F> OperationObserver for F
where
    F: Fn(&OperationEvent) + Send + Sync,
{
    fn on_operation(&self, event: &OperationEvent) {
        self(event);
    }
}
