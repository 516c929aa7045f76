//! Data directory layout.
//!
//! ```text
//! {data_dir}/
//!   config.toml
//!   ensemble.db
//!   ensembles/{name}/     per-ensemble working directories (0700)
//! ```

use std::path::{Path, PathBuf};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "ENSEMBLE_DATA_DIR";

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `ENSEMBLE_DATA_DIR` environment variable
/// 2. `~/.ensemble`
/// 3. `.ensemble` in the current directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".ensemble");
    }

    PathBuf::from(".ensemble")
}

/// Create the data directory (owner-only on unix) if it does not exist.
pub async fn ensure_data_dir(data_dir: &Path) -> std::io::Result<()> {
    if tokio::fs::try_exists(data_dir).await.unwrap_or(false) {
        return Ok(());
    }
    tokio::fs::create_dir_all(data_dir).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(data_dir, std::fs::Permissions::from_mode(0o700)).await?;
    }
    Ok(())
}

/// `{data_dir}/config.toml`
pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.toml")
}
