use thiserror::Error;

use crate::ensemble::WorkflowState;

/// Errors from user-facing ensemble and workflow commands.
#[derive(Debug, Error)]
pub enum EnsembleError {
    #[error("no such ensemble: {0}")]
    EnsembleNotFound(String),

    #[error("no such workflow: {0}")]
    WorkflowNotFound(String),

    #[error("ensemble '{0}' already exists")]
    EnsembleExists(String),

    #[error("workflow '{0}' already exists")]
    WorkflowExists(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid value for {field}: {value} (must be >= 1)")]
    InvalidLimit { field: &'static str, value: u32 },

    #[error("invalid workflow basedir: {0}")]
    InvalidBasedir(String),

    #[error("cannot {command} workflow in state {from}")]
    InvalidStateChange {
        command: String,
        from: WorkflowState,
    },

    #[error("workflow {0} was changed by another command, try again")]
    ConcurrentChange(String),

    #[error("storage error: {0}")]
    StorageError(String),
}

/// Errors from repository operations (used by trait definitions in ensemble-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    /// The row no longer has the state the write was based on.
    #[error("stale write: {0}")]
    Stale(String),
}

/// Errors from the per-workflow process lifecycle.
///
/// Launch errors are surfaced synchronously and turned into PLAN_FAILED or
/// RUN_FAILED by the caller. Bookkeeping errors leave the workflow where it
/// is so the next cycle can look again.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("planner already running")]
    PlannerAlreadyRunning,

    #[error("working directory does not exist: {0}")]
    MissingWorkingDir(String),

    #[error("unable to write pidfile {path}: {reason}")]
    Pidfile { path: String, reason: String },

    #[error("non-zero exitcode launching script: {0}")]
    LaunchExit(i32),

    #[error("failed to launch script: {0}")]
    Launch(String),

    #[error("script failed with exitcode {code}")]
    ScriptFailed {
        code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("submission produced errors: {0}")]
    Submission(String),

    #[error("{0}")]
    Bookkeeping(String),

    #[error("workflow is still running")]
    StillRunning,

    #[error("monitoring query failed: {0}")]
    Monitoring(#[from] RepositoryError),

    #[error("liveness check failed: {0}")]
    Liveness(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl LifecycleError {
    pub fn bookkeeping(msg: impl Into<String>) -> Self {
        LifecycleError::Bookkeeping(msg.into())
    }
}

/// Errors from locating the planner and execution tools at startup.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("{var} is not a directory: {path}")]
    HomeNotDirectory { var: String, path: String },

    #[error("{var}/bin is not a directory: {path}")]
    BinNotDirectory { var: String, path: String },

    #[error("{0} not found on PATH")]
    NotOnPath(String),

    #[error("{exe} not found: {path}")]
    ToolMissing { exe: String, path: String },

    #[error("unable to build PATH: {0}")]
    InvalidPath(String),
}
