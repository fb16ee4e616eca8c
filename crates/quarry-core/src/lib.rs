// crates/quarry-core/src/lib.rs
// ============================================================================
// Module: Quarry Core
// Description: Backend-agnostic model of the Quarry database engine.
// Purpose: Share errors, observers, and identifiers across engine crates.
// Dependencies: serde, serde_json, thiserror, tracing
// ============================================================================

//! ## Overview
//! Quarry core defines the pieces of the engine that do not depend on the
//! storage backend: the error taxonomy, observer traits and the
//! [`Notifier`] hub, the generation-checked [`HandleTable`], cooperative
//! [`CancellationSignal`]s, the pausable transaction [`UnitOutcome`], and the
//! value types reported by migration and maintenance operations.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod cancellation;
pub mod error;
pub mod handle_table;
pub mod interfaces;
pub mod log_sink;
pub mod maintenance;
pub mod migration;
pub mod notifier;
pub mod transaction;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use cancellation::CancellationSignal;
pub use error::ErrorCode;
pub use error::ErrorLevel;
pub use error::ErrorValue;
pub use error::QuarryError;
pub use handle_table::HandleTable;
pub use handle_table::ObjectId;
pub use interfaces::CorruptionEvent;
pub use interfaces::CorruptionObserver;
pub use interfaces::ErrorObserver;
pub use interfaces::MigrationObserver;
pub use interfaces::Operation;
pub use interfaces::OperationEvent;
pub use interfaces::OperationObserver;
pub use interfaces::PerformanceObserver;
pub use interfaces::PerformanceTrace;
pub use interfaces::SqlObserver;
pub use interfaces::SqlTrace;
pub use log_sink::JsonLineErrorObserver;
pub use maintenance::BackupFilter;
pub use maintenance::BackupReport;
pub use maintenance::CheckpointMode;
pub use maintenance::CheckpointReport;
pub use maintenance::IntegrityReport;
pub use migration::MigrationBaseInfo;
pub use migration::MigrationFilter;
pub use migration::MigrationStep;
pub use migration::MigrationUserInfo;
pub use notifier::Notifier;
pub use notifier::ObserverSlot;
pub use transaction::TransactionState;
pub use transaction::UnitOutcome;
