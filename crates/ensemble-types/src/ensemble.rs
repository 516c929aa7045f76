//! Ensemble and ensemble-workflow domain types.
//!
//! An ensemble is a named collection of workflow submissions that share
//! planning and running concurrency caps. Each workflow moves through the
//! lifecycle described by [`WorkflowState`]; only the states in the
//! actionable subset are ever advanced by the manager.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum length of ensemble and workflow names.
pub const MAX_NAME_LEN: usize = 100;

// ---------------------------------------------------------------------------
// Ensemble
// ---------------------------------------------------------------------------

/// Admission state of an ensemble.
///
/// - Active: workflows are admitted to planning and running
/// - Paused: nothing new is admitted; in-flight work is still observed
/// - Held: same admission behavior as Paused, used for operator holds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnsembleState {
    #[default]
    Active,
    Paused,
    Held,
}

impl EnsembleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnsembleState::Active => "ACTIVE",
            EnsembleState::Paused => "PAUSED",
            EnsembleState::Held => "HELD",
        }
    }
}

impl fmt::Display for EnsembleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnsembleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Ok(EnsembleState::Active),
            "PAUSED" => Ok(EnsembleState::Paused),
            "HELD" => Ok(EnsembleState::Held),
            other => Err(format!("invalid ensemble state: '{other}'")),
        }
    }
}

/// A named collection of workflows sharing concurrency caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ensemble {
    pub id: i64,
    /// Owner; ensemble names are unique per user.
    pub username: String,
    pub name: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub state: EnsembleState,
    /// Maximum number of workflows in PLANNING at once.
    pub max_planning: u32,
    /// Maximum number of workflows in RUNNING at once.
    pub max_running: u32,
}

impl Ensemble {
    pub fn is_active(&self) -> bool {
        self.state == EnsembleState::Active
    }
}

/// Request to create a new ensemble.
#[derive(Debug, Clone)]
pub struct CreateEnsembleRequest {
    pub username: String,
    pub name: String,
    pub max_planning: Option<u32>,
    pub max_running: Option<u32>,
}

// ---------------------------------------------------------------------------
// Workflow state
// ---------------------------------------------------------------------------

/// Lifecycle state of a workflow inside an ensemble.
///
/// ```text
/// READY -> PLANNING -> QUEUED -> RUNNING -> SUCCESSFUL | FAILED
///    \         \          \         \
///     PLAN_FAILED          RUN_FAILED
/// ```
///
/// Any state can be moved to ABORTED by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    Ready,
    Planning,
    PlanFailed,
    Queued,
    RunFailed,
    Running,
    Failed,
    Successful,
    Aborted,
}

impl WorkflowState {
    /// The states the manager advances. Everything else is left alone.
    pub const ACTIONABLE: [WorkflowState; 4] = [
        WorkflowState::Ready,
        WorkflowState::Planning,
        WorkflowState::Queued,
        WorkflowState::Running,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Ready => "READY",
            WorkflowState::Planning => "PLANNING",
            WorkflowState::PlanFailed => "PLAN_FAILED",
            WorkflowState::Queued => "QUEUED",
            WorkflowState::RunFailed => "RUN_FAILED",
            WorkflowState::Running => "RUNNING",
            WorkflowState::Failed => "FAILED",
            WorkflowState::Successful => "SUCCESSFUL",
            WorkflowState::Aborted => "ABORTED",
        }
    }

    pub fn is_actionable(&self) -> bool {
        Self::ACTIONABLE.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_actionable()
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "READY" => Ok(WorkflowState::Ready),
            "PLANNING" => Ok(WorkflowState::Planning),
            "PLAN_FAILED" => Ok(WorkflowState::PlanFailed),
            "QUEUED" => Ok(WorkflowState::Queued),
            "RUN_FAILED" => Ok(WorkflowState::RunFailed),
            "RUNNING" => Ok(WorkflowState::Running),
            "FAILED" => Ok(WorkflowState::Failed),
            "SUCCESSFUL" => Ok(WorkflowState::Successful),
            "ABORTED" => Ok(WorkflowState::Aborted),
            other => Err(format!("invalid workflow state: '{other}'")),
        }
    }
}

/// A user-requested workflow state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowCommand {
    /// Back to READY so the workflow is planned again.
    Replan,
    /// Back to QUEUED, reusing the existing submit directory.
    Rerun,
    /// Stop tracking the workflow. The external process is not signalled.
    Abort,
}

impl WorkflowCommand {
    /// The state a workflow lands in after this command.
    pub fn target(&self) -> WorkflowState {
        match self {
            WorkflowCommand::Replan => WorkflowState::Ready,
            WorkflowCommand::Rerun => WorkflowState::Queued,
            WorkflowCommand::Abort => WorkflowState::Aborted,
        }
    }

    /// Whether the command may be applied to a workflow in `from`.
    pub fn allowed_from(&self, from: WorkflowState) -> bool {
        match self {
            WorkflowCommand::Replan => matches!(
                from,
                WorkflowState::PlanFailed | WorkflowState::RunFailed | WorkflowState::Failed
            ),
            WorkflowCommand::Rerun => {
                matches!(from, WorkflowState::RunFailed | WorkflowState::Failed)
            }
            WorkflowCommand::Abort => from != WorkflowState::Aborted,
        }
    }
}

impl fmt::Display for WorkflowCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowCommand::Replan => write!(f, "replan"),
            WorkflowCommand::Rerun => write!(f, "rerun"),
            WorkflowCommand::Abort => write!(f, "abort"),
        }
    }
}

// ---------------------------------------------------------------------------
// Ensemble workflow
// ---------------------------------------------------------------------------

/// A workflow submission belonging to exactly one ensemble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleWorkflow {
    pub id: i64,
    pub ensemble_id: i64,
    /// Unique within the ensemble; also names the on-disk marker files.
    pub name: String,
    pub created: DateTime<Utc>,
    /// Set on every state transition.
    pub updated: DateTime<Utc>,
    pub state: WorkflowState,
    /// Lower values are planned and run first.
    pub priority: i32,
    /// Full shell command line that plans the workflow.
    pub plan_command: String,
    /// Working directory for planning and home of the marker files.
    pub basedir: PathBuf,
    /// Set when planning succeeds.
    pub wf_uuid: Option<Uuid>,
    /// Set when planning succeeds.
    pub submitdir: Option<PathBuf>,
}

impl EnsembleWorkflow {
    /// Move to `state` and stamp `updated`.
    pub fn transition(&mut self, state: WorkflowState) {
        self.state = state;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated = Utc::now();
    }

    pub fn pidfile(&self) -> PathBuf {
        self.marker("plan.pid")
    }

    pub fn logfile(&self) -> PathBuf {
        self.marker("plan.log")
    }

    pub fn runfile(&self) -> PathBuf {
        self.marker("run")
    }

    pub fn resultfile(&self) -> PathBuf {
        self.marker("plan.result")
    }

    /// Kernel start time of the planner recorded next to its PID.
    pub fn startfile(&self) -> PathBuf {
        self.marker("plan.start")
    }

    fn marker(&self, suffix: &str) -> PathBuf {
        self.basedir.join(format!("{}.{suffix}", self.name))
    }

    pub fn basedir(&self) -> &Path {
        &self.basedir
    }
}

/// Request to submit a new workflow to an ensemble.
#[derive(Debug, Clone)]
pub struct SubmitWorkflowRequest {
    pub name: String,
    pub plan_command: String,
    pub basedir: PathBuf,
    pub priority: i32,
}

/// Check an ensemble or workflow name.
///
/// Names must be non-empty, shorter than [`MAX_NAME_LEN`], contain only
/// `[A-Za-z0-9._-]` and never contain `..`.
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name cannot be empty".to_string());
    }
    if name.len() >= MAX_NAME_LEN {
        return Err(format!("name too long: {}", name.len()));
    }
    if name.contains("..")
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(format!("invalid name: {name}"));
    }
    Ok(())
}
