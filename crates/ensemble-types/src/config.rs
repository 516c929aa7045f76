//! Configuration types for the ensemble manager.
//!
//! `ManagerConfig` represents the `config.toml` in the data directory. Every
//! field has a default so an empty or missing file is valid.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerConfig {
    #[serde(default)]
    pub manager: LoopConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Polling loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Seconds to sleep between cycles.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Try QUEUED -> RUNNING in the same cycle a workflow finishes planning.
    #[serde(default = "default_run_after_planning")]
    pub run_after_planning: bool,
}

fn default_interval_secs() -> u64 {
    60
}

fn default_run_after_planning() -> bool {
    true
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            run_after_planning: default_run_after_planning(),
        }
    }
}

/// Where the planner and execution tools live and how they are invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Fallback for the `PEGASUS_HOME` environment variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pegasus_home: Option<PathBuf>,

    /// Fallback for the `CONDOR_HOME` environment variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condor_home: Option<PathBuf>,

    /// Submission tool invoked with the submit directory as its only argument.
    #[serde(default = "default_run_command")]
    pub run_command: String,

    /// Token that starts the planner output line naming the submit directory.
    #[serde(default = "default_submit_marker")]
    pub submit_marker: String,
}

fn default_run_command() -> String {
    "pegasus-run".to_string()
}

fn default_submit_marker() -> String {
    "pegasus-run".to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            pegasus_home: None,
            condor_home: None,
            run_command: default_run_command(),
            submit_marker: default_submit_marker(),
        }
    }
}

/// Database locations. `None` means "derive from the data directory".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Read-only monitoring database; defaults to the main database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring_url: Option<String>,
}
