//! Local implementation of the workflow lifecycle.
//!
//! Planning runs the workflow's `plan_command` detached in its basedir
//! through a pipeline that keeps everything the manager needs on disk:
//!
//! ```text
//! { ( plan_command ) 2>&1; echo $? > NAME.plan.result; } \
//!     | tee -a NAME.plan.log | grep '^MARKER' > NAME.run
//! ```
//!
//! `NAME.plan.pid` holds the PID of that pipeline and `NAME.plan.start` its
//! kernel start time, so a recycled PID is not mistaken for the planner.
//! While the planner is alive the workflow is planning. Once it is gone, `NAME.plan.result` holds the
//! planner's own exit status and `NAME.run` the line naming the submit
//! directory. Nothing about planning is kept in memory, so a restarted
//! daemon sees exactly what the previous one saw.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ensemble_core::repository::monitoring::MonitoringSource;
use ensemble_core::workflow::lifecycle::{LifecycleFactory, WorkflowLifecycle};
use ensemble_types::config::ToolsConfig;
use ensemble_types::ensemble::EnsembleWorkflow;
use ensemble_types::error::LifecycleError;
use ensemble_types::monitoring::MonitorRecord;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::process::launcher::{ProcessLauncher, parse_pid, pid_alive_since, process_start_time};
use crate::process::{quote_path, shell_quote};

/// File inside the submit directory that records the workflow UUID.
pub const BRAINDUMP: &str = "braindump.txt";

struct Shared<M> {
    launcher: ProcessLauncher,
    monitoring: M,
    run_command: String,
    submit_marker: String,
}

/// Builds [`LocalWorkflowProcessor`]s that share one launcher and one
/// monitoring source.
pub struct LocalLifecycleFactory<M: MonitoringSource> {
    shared: Arc<Shared<M>>,
}

impl<M: MonitoringSource> LocalLifecycleFactory<M> {
    pub fn new(launcher: ProcessLauncher, monitoring: M, tools: &ToolsConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                launcher,
                monitoring,
                run_command: tools.run_command.clone(),
                submit_marker: tools.submit_marker.clone(),
            }),
        }
    }
}

impl<M: MonitoringSource> LifecycleFactory for LocalLifecycleFactory<M> {
    type Lifecycle = LocalWorkflowProcessor<M>;

    fn for_workflow(&self, workflow: &EnsembleWorkflow) -> LocalWorkflowProcessor<M> {
        LocalWorkflowProcessor {
            workflow: workflow.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Lifecycle of one workflow, backed by marker files in its basedir.
pub struct LocalWorkflowProcessor<M: MonitoringSource> {
    workflow: EnsembleWorkflow,
    shared: Arc<Shared<M>>,
}

impl<M: MonitoringSource> LocalWorkflowProcessor<M> {
    /// The detached planning pipeline for this workflow.
    fn planning_script(&self) -> String {
        let wf = &self.workflow;
        format!(
            "{{ ( {cmd} ) 2>&1; echo $? > {result}; }} | tee -a {log} | grep -e {pattern} > {run}",
            cmd = wf.plan_command,
            result = quote_path(&wf.resultfile()),
            log = quote_path(&wf.logfile()),
            pattern = shell_quote(&format!("^{}", bre_escape(&self.shared.submit_marker))),
            run = quote_path(&wf.runfile()),
        )
    }

    /// Whether the planner recorded in the pidfile is still running.
    async fn planner_alive(&self, pid: i32) -> Result<bool, LifecycleError> {
        let startfile = self.workflow.startfile();
        let started = match read_marker(&startfile).await? {
            Some(contents) => match contents.trim().parse::<u64>() {
                Ok(t) => Some(t),
                Err(_) => {
                    tracing::warn!(path = %startfile.display(), "ignoring invalid start time");
                    None
                }
            },
            None => None,
        };
        pid_alive_since(pid, started)
    }

    async fn latest_record(&self) -> Result<Option<MonitorRecord>, LifecycleError> {
        let wf_uuid = self
            .workflow
            .wf_uuid
            .ok_or_else(|| LifecycleError::bookkeeping("workflow has no wf_uuid"))?;
        Ok(self
            .shared
            .monitoring
            .latest_state_since(&wf_uuid, self.workflow.updated)
            .await?)
    }
}

impl<M: MonitoringSource> WorkflowLifecycle for LocalWorkflowProcessor<M> {
    async fn plan(&self) -> Result<(), LifecycleError> {
        let wf = &self.workflow;
        let pidfile = wf.pidfile();

        if let Some(contents) = read_marker(&pidfile).await? {
            match parse_pid(&contents) {
                Ok(pid) if self.planner_alive(pid).await? => {
                    return Err(LifecycleError::PlannerAlreadyRunning);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "ignoring stale pidfile"),
            }
        }

        for stale in [wf.runfile(), wf.resultfile(), wf.startfile(), pidfile.clone()] {
            remove_if_exists(&stale).await?;
        }

        let pid = self
            .shared
            .launcher
            .forkscript(&self.planning_script(), wf.basedir(), &pidfile)
            .await?;

        // Gone already if the planner was that quick; liveness then falls
        // back to the bare PID, which is dead too.
        if let Some(started) = process_start_time(pid as i32) {
            tokio::fs::write(wf.startfile(), format!("{started}\n")).await?;
        }
        tracing::debug!(workflow = %wf.name, pid, "planner launched");
        Ok(())
    }

    async fn planning(&self) -> Result<bool, LifecycleError> {
        let pidfile = self.workflow.pidfile();
        let contents = read_marker(&pidfile).await?.ok_or_else(|| {
            LifecycleError::bookkeeping(format!("pidfile missing: {}", pidfile.display()))
        })?;
        self.planner_alive(parse_pid(&contents)?).await
    }

    async fn planning_successful(&self) -> Result<bool, LifecycleError> {
        let resultfile = self.workflow.resultfile();
        let contents = read_marker(&resultfile).await?.ok_or_else(|| {
            LifecycleError::bookkeeping(format!("resultfile missing: {}", resultfile.display()))
        })?;
        let code: i32 = contents.trim().parse().map_err(|_| {
            LifecycleError::bookkeeping(format!("invalid exit code in resultfile: {:?}", contents.trim()))
        })?;

        if code != 0 {
            tracing::info!(workflow = %self.workflow.name, code, "planner exited non-zero");
            return Ok(false);
        }

        match self.find_submitdir().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::info!(workflow = %self.workflow.name, error = %e, "planner output has no submit directory");
                Ok(false)
            }
        }
    }

    async fn find_submitdir(&self) -> Result<PathBuf, LifecycleError> {
        let runfile = self.workflow.runfile();
        let contents = read_marker(&runfile).await?.ok_or_else(|| {
            LifecycleError::bookkeeping(format!("runfile missing: {}", runfile.display()))
        })?;

        let dir = extract_submitdir(&contents, &self.shared.submit_marker).ok_or_else(|| {
            LifecycleError::bookkeeping(format!(
                "no '{}' line in {}",
                self.shared.submit_marker,
                runfile.display()
            ))
        })?;

        Ok(if dir.is_absolute() {
            dir
        } else {
            self.workflow.basedir().join(dir)
        })
    }

    async fn get_wf_uuid(&self, submitdir: &Path) -> Result<Uuid, LifecycleError> {
        let braindump = submitdir.join(BRAINDUMP);
        let contents = read_marker(&braindump).await?.ok_or_else(|| {
            LifecycleError::bookkeeping(format!("braindump missing: {}", braindump.display()))
        })?;
        extract_wf_uuid(&contents).ok_or_else(|| {
            LifecycleError::bookkeeping(format!("no valid wf_uuid in {}", braindump.display()))
        })
    }

    async fn run(&self) -> Result<(), LifecycleError> {
        let wf = &self.workflow;
        let submitdir = wf
            .submitdir
            .as_deref()
            .ok_or_else(|| LifecycleError::bookkeeping("workflow has no submit directory"))?;
        if !submitdir.is_dir() {
            return Err(LifecycleError::bookkeeping(format!(
                "submit directory does not exist: {}",
                submitdir.display()
            )));
        }

        let script = format!("{} {}", self.shared.run_command, quote_path(submitdir));
        let output = match self.shared.launcher.runscript(&script, wf.basedir()).await {
            Ok(output) => output,
            Err(LifecycleError::ScriptFailed { code, stdout, stderr }) => {
                append_log(&wf.logfile(), &[&stdout, &stderr]).await?;
                return Err(LifecycleError::ScriptFailed { code, stdout, stderr });
            }
            Err(e) => return Err(e),
        };
        append_log(&wf.logfile(), &[&output.stdout, &output.stderr]).await?;

        let stderr = output.stderr.trim();
        if !stderr.is_empty() {
            return Err(LifecycleError::Submission(stderr.to_string()));
        }
        Ok(())
    }

    async fn pending(&self) -> Result<bool, LifecycleError> {
        Ok(self.latest_record().await?.is_none())
    }

    async fn running(&self) -> Result<bool, LifecycleError> {
        Ok(match self.latest_record().await? {
            None => true,
            Some(record) => record.state.is_started(),
        })
    }

    async fn running_successful(&self) -> Result<bool, LifecycleError> {
        match self.latest_record().await? {
            Some(record) if !record.state.is_started() => Ok(record.succeeded()),
            _ => Err(LifecycleError::StillRunning),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Read a marker file, mapping "not found" to `None`.
async fn read_marker(path: &Path) -> Result<Option<String>, LifecycleError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn append_log(path: &Path, chunks: &[&str]) -> Result<(), LifecycleError> {
    let mut log = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    for chunk in chunks {
        log.write_all(chunk.as_bytes()).await?;
    }
    log.flush().await?;
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<(), LifecycleError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Second field of the last line starting with `marker`.
fn extract_submitdir(runfile: &str, marker: &str) -> Option<PathBuf> {
    runfile
        .lines()
        .filter(|line| line.starts_with(marker))
        .filter_map(|line| line.split_whitespace().nth(1))
        .last()
        .map(PathBuf::from)
}

/// Value of the `wf_uuid` line of a braindump file.
fn extract_wf_uuid(braindump: &str) -> Option<Uuid> {
    braindump.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some("wf_uuid"), Some(value)) => value.parse().ok(),
            _ => None,
        }
    })
}

/// Escape characters special in a POSIX basic regular expression.
fn bre_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '.' | '[' | ']' | '*' | '^' | '$' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
