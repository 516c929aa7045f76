//! Configuration loader for the ensemble manager.
//!
//! Reads `config.toml` from the data directory (`~/.ensemble/` by default)
//! into [`ManagerConfig`]. A missing or malformed file yields the defaults.

use std::path::Path;
use std::time::Duration;

use ensemble_types::config::ManagerConfig;

use crate::filesystem::config_path;
use crate::sqlite::pool::default_database_url;

/// Shortest allowed sleep between cycles.
const MIN_INTERVAL_SECS: u64 = 1;

/// Load configuration from `{data_dir}/config.toml`.
///
/// - Missing file: [`ManagerConfig::default()`].
/// - Unreadable or unparsable file: logs a warning and returns the default.
pub async fn load_manager_config(data_dir: &Path) -> ManagerConfig {
    let path = config_path(data_dir);

    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", path.display());
            return ManagerConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return ManagerConfig::default();
        }
    };

    match toml::from_str::<ManagerConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            ManagerConfig::default()
        }
    }
}

/// Resolve the polling interval.
///
/// A command-line override wins over `config.toml`. Values below one
/// second are raised to one second.
pub fn resolve_interval(config: &ManagerConfig, cli_override: Option<u64>) -> Duration {
    let secs = cli_override.unwrap_or(config.manager.interval_secs);
    Duration::from_secs(secs.max(MIN_INTERVAL_SECS))
}

/// Main database URL: `[database] url`, else `ensemble.db` in the data dir.
pub fn resolve_database_url(config: &ManagerConfig, data_dir: &Path) -> String {
    config
        .database
        .url
        .clone()
        .unwrap_or_else(|| default_database_url(data_dir))
}
