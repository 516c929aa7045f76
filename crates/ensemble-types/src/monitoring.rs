//! Records read from the external run-time monitoring database.
//!
//! The monitoring daemon writes one row per workflow state change. The
//! ensemble manager only ever reads these rows.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Workflow-level state names recorded by the monitoring daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorState {
    WorkflowStarted,
    WorkflowTerminated,
    /// Any state name this crate does not know about.
    Other(String),
}

impl MonitorState {
    pub fn is_started(&self) -> bool {
        matches!(self, MonitorState::WorkflowStarted)
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorState::WorkflowStarted => write!(f, "WORKFLOW_STARTED"),
            MonitorState::WorkflowTerminated => write!(f, "WORKFLOW_TERMINATED"),
            MonitorState::Other(s) => write!(f, "{s}"),
        }
    }
}

impl FromStr for MonitorState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "WORKFLOW_STARTED" => MonitorState::WorkflowStarted,
            "WORKFLOW_TERMINATED" => MonitorState::WorkflowTerminated,
            other => MonitorState::Other(other.to_string()),
        })
    }
}

/// The most recent monitoring record for a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorRecord {
    pub wf_uuid: Uuid,
    pub state: MonitorState,
    /// Exit status of the workflow; only meaningful once terminated.
    pub status: Option<i32>,
    pub timestamp: DateTime<Utc>,
}

impl MonitorRecord {
    pub fn succeeded(&self) -> bool {
        self.status == Some(0)
    }
}
