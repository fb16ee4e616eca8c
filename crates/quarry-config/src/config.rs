// crates/quarry-config/src/config.rs
// ============================================================================
// Module: Quarry Configuration
// Description: Configuration loading and validation for Quarry.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: quarry-core, quarry-store-sqlite, serde, toml, tracing
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits:
//!
//! ```toml
//! [engine]
//! max_readers = 8
//! migration_batch_rows = 512
//!
//! [[databases]]
//! path = "data/main.db"
//! tag = 1
//! auto_backup = true
//! ```
//!
//! Relative database paths resolve against the directory of the config file.
//! Missing or invalid configuration fails closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use quarry_core::QuarryError;
use quarry_store_sqlite::Core;
use quarry_store_sqlite::Database;
use quarry_store_sqlite::EngineConfig;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "quarry.toml";
/// Environment variable used to override the config path.
const CONFIG_ENV_VAR: &str = "QUARRY_CONFIG";
/// Maximum configuration file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum number of configured databases.
pub const MAX_DATABASES: usize = 64;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Config Model
// ============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuarryConfig {
    /// Engine tunables applied to every configured database.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Databases opened at startup.
    #[serde(default)]
    pub databases: Vec<DatabaseEntry>,
    /// Directory of the file this config was loaded from.
    #[serde(skip)]
    source_dir: Option<PathBuf>,
}

/// One database opened at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseEntry {
    /// Database file path.
    pub path: PathBuf,
    /// Tag reported with traces and errors.
    #[serde(default)]
    pub tag: i64,
    /// Starts the background migration driver.
    #[serde(default)]
    pub auto_migration: bool,
    /// Starts the background backup driver.
    #[serde(default)]
    pub auto_backup: bool,
}

impl QuarryConfig {
    /// Loads configuration from `path`, the `QUARRY_CONFIG` environment
    /// variable, or `quarry.toml` in the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read, exceeds the size
    /// limit, is not UTF-8, fails to parse, or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let mut config = Self::from_toml(content)?;
        config.source_dir = resolved.parent().map(Path::to_path_buf);
        tracing::debug!(
            path = %resolved.display(),
            databases = config.databases.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Parses and validates configuration text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] when validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the engine section and every database entry.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine
            .validate()
            .map_err(|err| ConfigError::Invalid(format!("engine: {}", err.message())))?;
        if self.databases.len() > MAX_DATABASES {
            return Err(ConfigError::Invalid(format!(
                "databases must not exceed {MAX_DATABASES} entries"
            )));
        }
        let mut seen = BTreeSet::new();
        for (index, entry) in self.databases.iter().enumerate() {
            let field = format!("databases[{index}].path");
            validate_path_string(&field, &entry.path.to_string_lossy())?;
            if !seen.insert(entry.path.clone()) {
                return Err(ConfigError::Invalid(format!("{field} is configured twice")));
            }
        }
        Ok(())
    }

    /// Returns the path an entry opens, resolving relative paths against
    /// the config file directory.
    #[must_use]
    pub fn database_path(&self, entry: &DatabaseEntry) -> PathBuf {
        match &self.source_dir {
            Some(dir) if entry.path.is_relative() => dir.join(&entry.path),
            _ => entry.path.clone(),
        }
    }

    /// Opens every configured database in `core`, applying tags and
    /// starting the requested background drivers.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Open`] when a database cannot be opened or a
    /// driver cannot be started.
    pub fn open_databases(&self, core: &Arc<Core>) -> Result<Vec<Database>, ConfigError> {
        let mut opened = Vec::with_capacity(self.databases.len());
        for entry in &self.databases {
            let path = self.database_path(entry);
            let database = Database::open_in(core, &path, self.engine.clone())
                .map_err(|err| open_error(&path, &err))?;
            if entry.tag != 0 {
                database.set_tag(entry.tag);
            }
            if entry.auto_migration {
                database
                    .enable_auto_migration(true)
                    .map_err(|err| open_error(&path, &err))?;
            }
            if entry.auto_backup {
                database
                    .enable_auto_backup(true)
                    .map_err(|err| open_error(&path, &err))?;
            }
            tracing::info!(
                path = %path.display(),
                tag = entry.tag,
                auto_migration = entry.auto_migration,
                auto_backup = entry.auto_backup,
                "configured database opened"
            );
            opened.push(database);
        }
        Ok(opened)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
    /// A configured database could not be opened.
    #[error("config database open error: {0}")]
    Open(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Wraps an engine error raised while opening a configured database.
fn open_error(path: &Path, err: &QuarryError) -> ConfigError {
    ConfigError::Open(format!("{}: {err}", path.display()))
}

/// Resolves the config path from the caller or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        if component.as_os_str().to_string_lossy().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}
