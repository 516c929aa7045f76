//! Per-cycle context and the outcome report of a cycle.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ensemble_types::ensemble::WorkflowState;
use serde::Serialize;

/// Scheduling policy knobs that are fixed for the lifetime of the manager.
#[derive(Debug, Clone)]
pub struct CyclePolicy {
    /// Try QUEUED -> RUNNING in the same cycle planning finishes.
    pub run_after_planning: bool,
    /// Root under which each ensemble gets a private working directory.
    pub work_root: PathBuf,
}

impl CyclePolicy {
    pub fn new(work_root: impl Into<PathBuf>) -> Self {
        Self {
            run_after_planning: true,
            work_root: work_root.into(),
        }
    }
}

/// Everything one cycle needs. Built fresh every cycle and dropped at the
/// end of it; nothing carries over except what is in the database or on disk.
#[derive(Debug, Clone)]
pub struct CycleContext {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub policy: CyclePolicy,
}

impl CycleContext {
    pub fn new(cycle: u64, policy: CyclePolicy) -> Self {
        Self {
            cycle,
            started_at: Utc::now(),
            policy,
        }
    }

    /// `<work_root>/ensembles/<name>`
    pub fn ensemble_dir(&self, name: &str) -> PathBuf {
        self.policy.work_root.join("ensembles").join(name)
    }

    pub fn work_root(&self) -> &Path {
        &self.policy.work_root
    }
}

/// A committed workflow state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub ensemble: String,
    pub workflow: String,
    pub from: WorkflowState,
    pub to: WorkflowState,
}

/// A workflow whose step failed and was rolled back.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowFailure {
    pub ensemble: String,
    pub workflow: String,
    pub error: String,
}

/// What happened during one cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub ensembles: usize,
    pub transitions: Vec<Transition>,
    pub failures: Vec<WorkflowFailure>,
}

impl CycleReport {
    pub fn merge(&mut self, other: CycleReport) {
        self.ensembles += other.ensembles;
        self.transitions.extend(other.transitions);
        self.failures.extend(other.failures);
    }

    pub fn is_quiet(&self) -> bool {
        self.transitions.is_empty() && self.failures.is_empty()
    }

    /// Transitions of one workflow in the order they happened.
    pub fn transitions_of(&self, workflow: &str) -> Vec<WorkflowState> {
        self.transitions
            .iter()
            .filter(|t| t.workflow == workflow)
            .map(|t| t.to)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensemble_dir_layout() {
        let ctx = CycleContext::new(3, CyclePolicy::new("/var/lib/ensemble"));
        assert_eq!(
            ctx.ensemble_dir("bigrun"),
            PathBuf::from("/var/lib/ensemble/ensembles/bigrun")
        );
        assert!(ctx.policy.run_after_planning);
    }

    #[test]
    fn test_report_merge_and_filter() {
        let mut report = CycleReport {
            cycle: 1,
            ..Default::default()
        };
        assert!(report.is_quiet());

        report.merge(CycleReport {
            cycle: 1,
            ensembles: 1,
            transitions: vec![
                Transition {
                    ensemble: "e".to_string(),
                    workflow: "w1".to_string(),
                    from: WorkflowState::Planning,
                    to: WorkflowState::Queued,
                },
                Transition {
                    ensemble: "e".to_string(),
                    workflow: "w1".to_string(),
                    from: WorkflowState::Queued,
                    to: WorkflowState::Running,
                },
            ],
            failures: vec![],
        });

        assert_eq!(report.ensembles, 1);
        assert!(!report.is_quiet());
        assert_eq!(
            report.transitions_of("w1"),
            vec![WorkflowState::Queued, WorkflowState::Running]
        );
        assert!(report.transitions_of("w2").is_empty());
    }
}
