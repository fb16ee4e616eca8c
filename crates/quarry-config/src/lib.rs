// crates/quarry-config/src/lib.rs
// ============================================================================
// Module: Quarry Config Library
// Description: Configuration model and loader for Quarry deployments.
// Purpose: Single source of truth for quarry.toml semantics.
// Dependencies: quarry-core, quarry-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `quarry-config` parses `quarry.toml`: the engine tunables shared by every
//! database and the list of databases to open at startup with their tag and
//! background drivers. Loading fails closed on oversized, non-UTF-8, or
//! invalid input.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::ConfigError;
pub use config::DatabaseEntry;
pub use config::MAX_CONFIG_FILE_SIZE;
pub use config::MAX_DATABASES;
pub use config::QuarryConfig;
