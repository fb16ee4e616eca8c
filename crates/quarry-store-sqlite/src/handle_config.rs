// crates/quarry-store-sqlite/src/handle_config.rs
// ============================================================================
// Module: Handle Configs
// Description: Named, prioritized setup steps applied to new connections.
// Purpose: Let callers customize every connection a database opens.
// Dependencies: quarry-core
// ============================================================================

//! ## Overview
//! A [`HandleConfig`] runs once on each newly opened connection, after the
//! engine's own pragmas. Configs are registered by name with a [`Priority`];
//! lower priority values run first and equal priorities keep registration
//! order. Changing the set bumps the pool's config generation so idle
//! connections are reopened under the new set.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use quarry_core::QuarryError;

use crate::handle::InnerHandle;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Ordering key for handle configs; lower values run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub i32);

impl Priority {
    /// Runs before every other config.
    pub const HIGHEST: Self = Self(i32::MIN);
    /// Runs early.
    pub const HIGH: Self = Self(-100);
    /// Default ordering.
    pub const DEFAULT: Self = Self(0);
    /// Runs late.
    pub const LOW: Self = Self(100);
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Setup step applied to each new connection.
pub trait HandleConfig: Send + Sync {
    /// Configures `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`QuarryError`] when the connection cannot be configured; the
    /// connection is then discarded and acquisition fails.
    fn invoke(&self, handle: &mut InnerHandle) -> Result<(), QuarryError>;
}

impl<F> HandleConfig for F
where
    F: Fn(&mut InnerHandle) -> Result<(), QuarryError> + Send + Sync,
{
    fn invoke(&self, handle: &mut InnerHandle) -> Result<(), QuarryError> {
        self(handle)
    }
}

/// One registered config.
#[derive(Clone)]
struct ConfigEntry {
    /// Registration name.
    name: String,
    /// Ordering key.
    priority: Priority,
    /// Setup step.
    config: Arc<dyn HandleConfig>,
}

/// Registered configs of one database.
#[derive(Clone, Default)]
pub(crate) struct ConfigSet {
    /// Entries sorted by priority, then registration order.
    entries: Vec<ConfigEntry>,
}

impl ConfigSet {
    /// Inserts or replaces the config named `name`.
    pub(crate) fn set(&mut self, name: &str, config: Arc<dyn HandleConfig>, priority: Priority) {
        self.entries.retain(|entry| entry.name != name);
        let position = self
            .entries
            .iter()
            .position(|entry| entry.priority > priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(
            position,
            ConfigEntry {
                name: name.to_string(),
                priority,
                config,
            },
        );
    }

    /// Removes the config named `name`, returning true when it existed.
    pub(crate) fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.name != name);
        before != self.entries.len()
    }

    /// Returns the configs in invocation order.
    pub(crate) fn ordered(&self) -> Vec<Arc<dyn HandleConfig>> {
        self.entries.iter().map(|entry| Arc::clone(&entry.config)).collect()
    }

    /// Returns the registered names in invocation order.
    pub(crate) fn names(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.name.clone()).collect()
    }
}
