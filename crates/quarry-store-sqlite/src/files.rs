// crates/quarry-store-sqlite/src/files.rs
// ============================================================================
// Module: Database Files
// Description: The file set of a database and blockaded file operations.
// Purpose: List, size, move, and remove every file a database owns.
// Dependencies: quarry-core, tracing
// ============================================================================

//! ## Overview
//! A database at `<path>` owns the main file, the `-wal`, `-shm`, and
//! `-journal` sidecars, the `.material` backup, and the `.deposited`
//! directory of earlier generations. File operations run under a blockade
//! with idle connections closed, so no connection observes a half-moved
//! file set.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::ffi::OsString;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use quarry_core::QuarryError;

use crate::backup::MATERIAL_SUFFIX;
use crate::database::Database;
use crate::sqlite::io_error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Suffix of the deposited generations directory.
pub(crate) const DEPOSITED_SUFFIX: &str = ".deposited";

/// Suffixes of the engine sidecar files.
const SIDECAR_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

// ============================================================================
// SECTION: Path Helpers
// ============================================================================

/// Returns `path` with `suffix` appended to its file name.
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Returns the main file, its sidecars, and the material.
pub(crate) fn data_files(path: &Path) -> Vec<PathBuf> {
    let mut files = vec![path.to_path_buf()];
    files.extend(SIDECAR_SUFFIXES.iter().map(|suffix| with_suffix(path, suffix)));
    files.push(with_suffix(path, MATERIAL_SUFFIX));
    files
}

/// Returns the deposited generations directory.
pub(crate) fn deposited_dir(path: &Path) -> PathBuf {
    with_suffix(path, DEPOSITED_SUFFIX)
}

/// Moves a file, copying across file systems when a rename fails.
pub(crate) fn move_file(from: &Path, to: &Path) -> Result<(), QuarryError> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to).map_err(|err| io_error(&err, "copy", from))?;
    fs::remove_file(from).map_err(|err| io_error(&err, "remove", from))
}

/// Returns the size of a file or, recursively, a directory.
fn path_size(path: &Path) -> Result<u64, QuarryError> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(io_error(&err, "inspect", path)),
    };
    if !metadata.is_dir() {
        return Ok(metadata.len());
    }
    let mut total = 0_u64;
    for entry in fs::read_dir(path).map_err(|err| io_error(&err, "read directory", path))? {
        let entry = entry.map_err(|err| io_error(&err, "read directory", path))?;
        total = total.saturating_add(path_size(&entry.path())?);
    }
    Ok(total)
}

/// Removes a file or directory when present.
fn remove_path(path: &Path) -> Result<(), QuarryError> {
    let result = if path.is_dir() { fs::remove_dir_all(path) } else { fs::remove_file(path) };
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_error(&err, "remove", path)),
    }
}

// ============================================================================
// SECTION: Database API
// ============================================================================

impl Database {
    /// Returns every path the database may own: the main file, sidecars,
    /// material, and deposited directory.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths = data_files(self.path());
        paths.push(deposited_dir(self.path()));
        paths
    }

    /// Removes every file of the database under a blockade.
    ///
    /// # Errors
    ///
    /// Returns `Busy` when the blockade cannot be taken, or `Io` when a file
    /// cannot be removed.
    pub fn remove_files(&self) -> Result<(), QuarryError> {
        self.track(self.with_files_blockaded("remove files", |paths| {
            for path in paths {
                remove_path(path)?;
            }
            Ok(())
        }))?;
        self.core().notifier().clear_corrupted(self.path_key());
        tracing::info!(path = %self.path_key(), "database files removed");
        Ok(())
    }

    /// Moves every file of the database into `directory` under a blockade.
    ///
    /// # Errors
    ///
    /// Returns `Busy` when the blockade cannot be taken, or `Io` when the
    /// directory cannot be created or a file cannot be moved.
    pub fn move_files(&self, directory: impl AsRef<Path>) -> Result<(), QuarryError> {
        let directory = directory.as_ref();
        self.track(self.with_files_blockaded("move files", |paths| {
            fs::create_dir_all(directory)
                .map_err(|err| io_error(&err, "create directory", directory))?;
            for path in paths.iter().filter(|path| path.exists()) {
                let Some(name) = path.file_name() else {
                    continue;
                };
                let destination = directory.join(name);
                if path.is_dir() {
                    fs::rename(path, &destination)
                        .map_err(|err| io_error(&err, "move directory", path))?;
                } else {
                    move_file(path, &destination)?;
                }
            }
            Ok(())
        }))?;
        tracing::info!(
            path = %self.path_key(),
            directory = %directory.display(),
            "database files moved"
        );
        Ok(())
    }

    /// Returns the total size in bytes of every file the database owns.
    ///
    /// # Errors
    ///
    /// Returns `Busy` when the blockade cannot be taken, or `Io` when a file
    /// cannot be inspected.
    pub fn files_size(&self) -> Result<u64, QuarryError> {
        self.track(self.with_files_blockaded("size files", |paths| {
            paths.iter().try_fold(0_u64, |total, path| Ok(total.saturating_add(path_size(path)?)))
        }))
    }

    /// Runs `operation` on the file set with the database blockaded and
    /// idle connections closed.
    fn with_files_blockaded<T>(
        &self,
        action: &str,
        operation: impl FnOnce(&[PathBuf]) -> Result<T, QuarryError>,
    ) -> Result<T, QuarryError> {
        let guard = self.blockade()?;
        self.purge();
        let paths = self.paths();
        let result = operation(&paths)
            .map_err(|err| self.shared().context().report_unregistered(err.with_operation(action)));
        drop(guard);
        result
    }
}
