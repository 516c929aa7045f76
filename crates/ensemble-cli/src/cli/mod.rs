//! CLI command definitions for the `ensemble` binary.
//!
//! Every command except `server` and `completions` is a single database
//! update. A running server picks the change up on its next cycle.

pub mod ensemble;
pub mod server;
pub mod workflow;

use std::str::FromStr;

use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Manage ensembles of scientific workflows.
#[derive(Parser)]
#[command(name = "ensemble", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for info, -vv for debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the ensemble manager.
    Server {
        /// Seconds between cycles (overrides config.toml).
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,

        /// Run a single cycle and exit.
        #[arg(long)]
        once: bool,

        /// Export spans to stdout through OpenTelemetry.
        #[arg(long)]
        otel: bool,
    },

    /// Create an ensemble.
    Create {
        /// Ensemble name.
        name: String,

        /// Maximum number of workflows being planned at once.
        #[arg(short = 'P', long)]
        max_planning: Option<u32>,

        /// Maximum number of workflows running at once.
        #[arg(short = 'R', long)]
        max_running: Option<u32>,
    },

    /// List ensembles.
    #[command(alias = "ls")]
    Ensembles,

    /// Pause an active ensemble.
    Pause { name: String },

    /// Activate a paused or held ensemble.
    Activate { name: String },

    /// Hold an active ensemble.
    Hold { name: String },

    /// Change ensemble configuration.
    #[command(arg_required_else_help = true)]
    Config {
        /// Ensemble name.
        name: String,

        /// Maximum number of workflows being planned at once.
        #[arg(short = 'P', long, required_unless_present = "max_running")]
        max_planning: Option<u32>,

        /// Maximum number of workflows running at once.
        #[arg(short = 'R', long)]
        max_running: Option<u32>,
    },

    /// Submit a workflow. The planning command runs in the current directory.
    Submit {
        /// Target as ENSEMBLE.WORKFLOW.
        target: WorkflowRef,

        /// Workflow priority (lower runs first).
        #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i32,

        /// Planning command and its arguments.
        #[arg(last = true, required = true, value_name = "COMMAND")]
        command: Vec<String>,
    },

    /// List the workflows of an ensemble.
    Workflows {
        /// Ensemble name.
        ensemble: String,

        /// Show every field instead of a table.
        #[arg(short, long)]
        long: bool,
    },

    /// Show one workflow.
    Status { target: WorkflowRef },

    /// Plan a failed workflow again.
    Replan { target: WorkflowRef },

    /// Submit a failed workflow again without replanning.
    Rerun { target: WorkflowRef },

    /// Stop scheduling a workflow.
    Abort { target: WorkflowRef },

    /// Change a workflow's priority.
    Priority {
        target: WorkflowRef,

        /// New priority.
        #[arg(short, long, allow_negative_numbers = true)]
        priority: i32,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// `ENSEMBLE.WORKFLOW` as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowRef {
    pub ensemble: String,
    pub workflow: String,
}

impl FromStr for WorkflowRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split('.').collect::<Vec<_>>().as_slice() {
            [ensemble, workflow] if !ensemble.is_empty() && !workflow.is_empty() => Ok(Self {
                ensemble: ensemble.to_string(),
                workflow: workflow.to_string(),
            }),
            _ => Err(format!("invalid ENSEMBLE.WORKFLOW: {s}")),
        }
    }
}

impl std::fmt::Display for WorkflowRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.ensemble, self.workflow)
    }
}

/// Timestamp in local time, as shown in tables.
pub fn format_time(dt: &DateTime<Utc>) -> String {
    dt.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}
