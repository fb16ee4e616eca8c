// crates/quarry-store-sqlite/src/lib.rs
// ============================================================================
// Module: Quarry SQLite Engine
// Description: Embedded database engine core built on SQLite.
// Purpose: Pool handles, run transactions, migrate, and recover databases.
// Dependencies: quarry-core, rusqlite, serde, serde_json, sha2, tracing
// ============================================================================

//! ## Overview
//! This crate implements the Quarry engine on top of SQLite in WAL mode.
//! A process-wide [`Core`] resolves every path to one shared database whose
//! handle pool loans a single writer and a bounded set of readers.
//! On top of the pool it provides transactions (plain and pausable),
//! cooperative cancellation, table migration from legacy databases,
//! checkpoints, integrity checks, and corruption recovery through material
//! backups and deposited generations. [`ObjectBridge`] exposes the same
//! objects behind generation-checked identifiers.
//!
//! Security posture: database files and their contents are untrusted input;
//! recovery reads corrupted files with bounded windows and never trusts
//! page counts from a damaged header.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod backup;
pub mod bridge;
mod checkpoint;
pub mod config;
mod context;
pub mod database;
mod driver;
mod files;
pub mod handle;
pub mod handle_config;
mod integrity;
mod migration;
mod overlay;
pub mod pool;
mod recovery;
pub mod service;
mod sqlite;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use bridge::ObjectBridge;
pub use config::EngineConfig;
pub use config::JournalMode;
pub use config::MAX_MIGRATION_BATCH_ROWS;
pub use config::MAX_READERS;
pub use config::SyncMode;
pub use database::BlockadeGuard;
pub use database::Database;
pub use handle::HandleKind;
pub use handle::InnerHandle;
pub use handle_config::HandleConfig;
pub use handle_config::Priority;
pub use pool::RecyclableHandle;
pub use service::Core;
