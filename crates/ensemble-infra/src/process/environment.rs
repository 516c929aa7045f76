//! Discovery of the planner and execution tools.
//!
//! Each tool's `bin/` directory is resolved, in priority order, from its
//! HOME-style environment variable, then from `config.toml`, then by
//! searching `PATH` for a marker executable. Both directories are put in
//! front of `PATH` for every script the manager launches.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use ensemble_types::config::ToolsConfig;
use ensemble_types::error::EnvironmentError;

use super::launcher::ProcessLauncher;

/// A tool the manager depends on.
#[derive(Debug, Clone, Copy)]
pub struct ToolSpec {
    /// Environment variable naming the tool's install root.
    pub home_var: &'static str,
    /// Executable that must exist in `<home>/bin` or on `PATH`.
    pub marker: &'static str,
}

pub const PEGASUS: ToolSpec = ToolSpec {
    home_var: "PEGASUS_HOME",
    marker: "pegasus-plan",
};

pub const CONDOR: ToolSpec = ToolSpec {
    home_var: "CONDOR_HOME",
    marker: "condor_submit_dag",
};

/// Resolved tool locations and the `PATH` scripts run with.
#[derive(Debug, Clone)]
pub struct ToolEnvironment {
    pub pegasus_bin: PathBuf,
    pub condor_bin: PathBuf,
    path: OsString,
}

impl ToolEnvironment {
    /// Discover both tools from the process environment.
    pub fn discover(tools: &ToolsConfig) -> Result<Self, EnvironmentError> {
        Self::discover_with(tools, |var| std::env::var_os(var))
    }

    /// Discover both tools using `lookup` in place of the process
    /// environment.
    pub fn discover_with(
        tools: &ToolsConfig,
        lookup: impl Fn(&str) -> Option<OsString>,
    ) -> Result<Self, EnvironmentError> {
        let search_path = lookup("PATH").unwrap_or_default();

        let pegasus_bin = get_bin(
            PEGASUS,
            lookup(PEGASUS.home_var),
            tools.pegasus_home.as_deref(),
            &search_path,
        )?;
        let condor_bin = get_bin(
            CONDOR,
            lookup(CONDOR.home_var),
            tools.condor_home.as_deref(),
            &search_path,
        )?;

        let mut dirs = vec![pegasus_bin.clone(), condor_bin.clone()];
        dirs.extend(std::env::split_paths(&search_path));
        dirs.dedup();
        let path = std::env::join_paths(dirs)
            .map_err(|e| EnvironmentError::InvalidPath(e.to_string()))?;

        tracing::info!(
            pegasus_bin = %pegasus_bin.display(),
            condor_bin = %condor_bin.display(),
            "tool environment ready"
        );

        Ok(Self {
            pegasus_bin,
            condor_bin,
            path,
        })
    }

    /// The `PATH` value scripts are launched with.
    pub fn path(&self) -> &OsStr {
        &self.path
    }

    /// A launcher whose scripts see this environment.
    pub fn launcher(&self) -> ProcessLauncher {
        ProcessLauncher::new().env("PATH", self.path.clone())
    }
}

/// Resolve the `bin/` directory of one tool.
fn get_bin(
    spec: ToolSpec,
    env_home: Option<OsString>,
    config_home: Option<&Path>,
    search_path: &OsStr,
) -> Result<PathBuf, EnvironmentError> {
    let home = env_home
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
        .or_else(|| config_home.map(Path::to_path_buf));

    if let Some(home) = home {
        if !home.is_dir() {
            return Err(EnvironmentError::HomeNotDirectory {
                var: spec.home_var.to_string(),
                path: home.display().to_string(),
            });
        }
        let bin = home.join("bin");
        if !bin.is_dir() {
            return Err(EnvironmentError::BinNotDirectory {
                var: spec.home_var.to_string(),
                path: bin.display().to_string(),
            });
        }
        let exe = bin.join(spec.marker);
        if !is_executable(&exe) {
            return Err(EnvironmentError::ToolMissing {
                exe: spec.marker.to_string(),
                path: exe.display().to_string(),
            });
        }
        return Ok(bin);
    }

    pathfind(spec.marker, search_path)
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .ok_or_else(|| EnvironmentError::NotOnPath(spec.marker.to_string()))
}

/// First `dir/exe` on `search_path` that is an executable file.
pub fn pathfind(exe: &str, search_path: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_path)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(exe))
        .find(|candidate| is_executable(candidate))
}

/// Whether `path` is a regular file with an execute bit set.
pub fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.is_file() && meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        meta.is_file()
    }
}
