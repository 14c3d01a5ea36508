//! Data directory layout.

use std::path::{Path, PathBuf};

/// Database file name inside the data directory.
pub const DATABASE_FILE: &str = "dripflow.db";

/// Resolve the data directory.
///
/// Priority:
/// 1. `DRIPFLOW_DATA_DIR` environment variable
/// 2. `~/.dripflow`
/// 3. `./.dripflow` when no home directory can be determined
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("DRIPFLOW_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".dripflow");
    }

    PathBuf::from(".dripflow")
}

/// SQLite URL for the database inside `data_dir`, created on first open.
pub fn database_url(data_dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", data_dir.join(DATABASE_FILE).display())
}
