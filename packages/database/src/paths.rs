//! Default on-disk locations for the document store.

use std::path::{Path, PathBuf};

/// Environment variable overriding the document store path.
pub const DB_PATH_ENV: &str = "SENSOR_ARCHIVE_DB";

/// Store path used when [`DB_PATH_ENV`] is not set.
pub const DEFAULT_DB_PATH: &str = "data/sensor_archive.duckdb";

/// Returns the document store path from the environment, falling back to
/// [`DEFAULT_DB_PATH`].
#[must_use]
pub fn db_path_from_env() -> PathBuf {
    std::env::var(DB_PATH_ENV).map_or_else(|_| PathBuf::from(DEFAULT_DB_PATH), PathBuf::from)
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.as_os_str().is_empty() && !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
