//! Shell script launcher.
//!
//! Two ways to run a script through `/bin/sh -c`:
//!
//! - [`ProcessLauncher::runscript`] waits for the script and returns its
//!   output.
//! - [`ProcessLauncher::forkscript`] starts the script detached from the
//!   daemon and returns as soon as the script's PID is on disk. The script
//!   runs in its own process group with stdio on `/dev/null`, and the
//!   intermediate shell that backgrounded it is reaped immediately so the
//!   script is re-parented away from the daemon. Its PID stays observable
//!   through the pidfile after a daemon restart.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;

use ensemble_types::error::LifecycleError;
use tokio::process::Command;

const SHELL: &str = "/bin/sh";

/// Captured output of a finished script.
#[derive(Debug, Clone, Default)]
pub struct ScriptOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Launches shell scripts with a fixed set of extra environment variables.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    env: Vec<(OsString, OsString)>,
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an environment variable to every launched script.
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn command(&self, script: &str, cwd: &Path) -> Result<Command, LifecycleError> {
        if !cwd.is_dir() {
            return Err(LifecycleError::MissingWorkingDir(cwd.display().to_string()));
        }
        let mut cmd = Command::new(SHELL);
        cmd.arg("-c")
            .arg(script)
            .current_dir(cwd)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null());
        Ok(cmd)
    }

    /// Run `script` to completion.
    ///
    /// Fails if `cwd` does not exist, if the shell cannot be started, or if
    /// the script exits non-zero. A non-zero exit still carries the captured
    /// output.
    pub async fn runscript(&self, script: &str, cwd: &Path) -> Result<ScriptOutput, LifecycleError> {
        let output = self
            .command(script, cwd)?
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| LifecycleError::Launch(format!("{SHELL}: {e}")))?;

        let result = ScriptOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            tracing::warn!(
                code,
                stderr = %result.stderr.trim(),
                "script exited non-zero"
            );
            return Err(LifecycleError::ScriptFailed {
                code,
                stdout: result.stdout,
                stderr: result.stderr,
            });
        }
        Ok(result)
    }

    /// Start `script` detached and record its PID in `pidfile`.
    ///
    /// Returns once the PID is written, not once the script finishes.
    pub async fn forkscript(
        &self,
        script: &str,
        cwd: &Path,
        pidfile: &Path,
    ) -> Result<u32, LifecycleError> {
        // Fail before launching anything if the pidfile can't be written.
        tokio::fs::write(pidfile, b"")
            .await
            .map_err(|e| pidfile_error(pidfile, e))?;

        let wrapper = format!("( {script} ) </dev/null >/dev/null 2>&1 &\necho $!");

        let mut cmd = self.command(&wrapper, cwd)?;
        cmd.stdout(Stdio::piped()).stderr(Stdio::null());
        #[cfg(unix)]
        cmd.process_group(0);

        let output = cmd
            .output()
            .await
            .map_err(|e| LifecycleError::Launch(format!("{SHELL}: {e}")))?;

        if !output.status.success() {
            return Err(LifecycleError::LaunchExit(output.status.code().unwrap_or(-1)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let pid: u32 = stdout
            .trim()
            .parse()
            .map_err(|_| LifecycleError::Launch(format!("unexpected child pid: {:?}", stdout.trim())))?;

        tokio::fs::write(pidfile, format!("{pid}\n"))
            .await
            .map_err(|e| pidfile_error(pidfile, e))?;

        tracing::debug!(pid, pidfile = %pidfile.display(), "detached script started");
        Ok(pid)
    }
}

fn pidfile_error(path: &Path, e: std::io::Error) -> LifecycleError {
    LifecycleError::Pidfile {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

/// Parse the contents of a pidfile: a bare positive integer plus newline.
pub fn parse_pid(contents: &str) -> Result<i32, LifecycleError> {
    match contents.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => Ok(pid),
        _ => Err(LifecycleError::bookkeeping(format!(
            "invalid pid in pidfile: {:?}",
            contents.trim()
        ))),
    }
}

/// Whether process `pid` is alive.
///
/// Sends signal 0: "no such process" means not alive. A zombie
/// (exited but not yet reaped) also counts as not alive. Any other check
/// failure, such as a permission error, is returned.
#[cfg(unix)]
pub fn pid_alive(pid: i32) -> Result<bool, LifecycleError> {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if pid <= 0 {
        return Err(LifecycleError::Liveness(format!("refusing to signal pid {pid}")));
    }

    match kill(Pid::from_raw(pid), None) {
        Ok(()) => Ok(!is_zombie(pid)),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(LifecycleError::Liveness(format!("kill({pid}, 0): {e}"))),
    }
}

#[cfg(not(unix))]
pub fn pid_alive(pid: i32) -> Result<bool, LifecycleError> {
    Err(LifecycleError::Liveness(format!(
        "liveness checks are not supported on this platform (pid {pid})"
    )))
}

/// Whether `pid` is alive and is still the process that was started at
/// `started` (see [`process_start_time`]).
///
/// A live PID with a different start time was recycled by the kernel for an
/// unrelated process and counts as not alive. Without a recorded or readable
/// start time this is plain [`pid_alive`].
pub fn pid_alive_since(pid: i32, started: Option<u64>) -> Result<bool, LifecycleError> {
    if !pid_alive(pid)? {
        return Ok(false);
    }
    match (started, process_start_time(pid)) {
        (Some(expected), Some(actual)) if expected != actual => {
            tracing::debug!(pid, expected, actual, "pid was reused by another process");
            Ok(false)
        }
        _ => Ok(true),
    }
}

/// Kernel start time of `pid` in clock ticks since boot, from field 22 of
/// `/proc/<pid>/stat`. `None` without procfs or once the process is gone.
#[cfg(unix)]
pub fn process_start_time(pid: i32) -> Option<u64> {
    // Field 22 is the 20th token after comm.
    proc_stat_field(pid, 19)?.parse().ok()
}

#[cfg(not(unix))]
pub fn process_start_time(_pid: i32) -> Option<u64> {
    None
}

/// Read the process state from `/proc/<pid>/stat`. Platforms without procfs
/// never report zombies.
#[cfg(unix)]
fn is_zombie(pid: i32) -> bool {
    proc_stat_field(pid, 0).is_some_and(|state| state == "Z")
}

/// The `index`th whitespace-separated field after comm in
/// `/proc/<pid>/stat`, where index 0 is the state (field 3).
#[cfg(unix)]
fn proc_stat_field(pid: i32, index: usize) -> Option<String> {
    let contents = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // comm (field 2) may contain spaces and parens; the rest follows the
    // last ')'.
    let (_, rest) = contents.rsplit_once(')')?;
    rest.split_whitespace().nth(index).map(str::to_string)
}
