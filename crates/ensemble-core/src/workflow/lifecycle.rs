//! Per-workflow process lifecycle port.
//!
//! A [`WorkflowLifecycle`] owns the on-disk artifacts of one workflow
//! (pidfile, planner log, run capture, result capture) and knows how to ask
//! the monitoring source about it. The infrastructure layer supplies the
//! real implementation; core tests supply fakes.
//!
//! "Still in progress" is a normal `Ok` value. Only missing or unreadable
//! bookkeeping, launch failures and monitoring failures are errors.

use std::path::{Path, PathBuf};

use ensemble_types::ensemble::EnsembleWorkflow;
use ensemble_types::error::LifecycleError;
use uuid::Uuid;

/// Lifecycle operations for a single workflow instance.
pub trait WorkflowLifecycle: Send + Sync {
    /// Start the planner detached from the daemon.
    ///
    /// Returns once the planner's PID has been recorded, not once planning
    /// finishes. Fails with [`LifecycleError::PlannerAlreadyRunning`] if a
    /// previous planner is still alive.
    fn plan(&self) -> impl std::future::Future<Output = Result<(), LifecycleError>> + Send;

    /// Whether the recorded planner process is still alive.
    fn planning(&self) -> impl std::future::Future<Output = Result<bool, LifecycleError>> + Send;

    /// Whether the finished planner exited 0 and named a submit directory.
    fn planning_successful(
        &self,
    ) -> impl std::future::Future<Output = Result<bool, LifecycleError>> + Send;

    /// The submit directory announced by the planner.
    fn find_submitdir(
        &self,
    ) -> impl std::future::Future<Output = Result<PathBuf, LifecycleError>> + Send;

    /// The workflow UUID recorded inside a submit directory.
    fn get_wf_uuid(
        &self,
        submitdir: &Path,
    ) -> impl std::future::Future<Output = Result<Uuid, LifecycleError>> + Send;

    /// Submit the planned workflow for execution.
    fn run(&self) -> impl std::future::Future<Output = Result<(), LifecycleError>> + Send;

    /// True until the monitoring source has recorded anything for this run.
    fn pending(&self) -> impl std::future::Future<Output = Result<bool, LifecycleError>> + Send;

    /// True while the latest monitoring record says the workflow started.
    /// No record at all also counts as running.
    fn running(&self) -> impl std::future::Future<Output = Result<bool, LifecycleError>> + Send;

    /// Whether the terminated workflow exited 0.
    ///
    /// Fails with [`LifecycleError::StillRunning`] if the workflow has not
    /// terminated.
    fn running_successful(
        &self,
    ) -> impl std::future::Future<Output = Result<bool, LifecycleError>> + Send;
}

/// Builds a lifecycle handle for a workflow snapshot.
///
/// Handles are cheap and short-lived: the ensemble processor builds a new
/// one whenever the workflow record changes.
pub trait LifecycleFactory: Send + Sync {
    type Lifecycle: WorkflowLifecycle;

    fn for_workflow(&self, workflow: &EnsembleWorkflow) -> Self::Lifecycle;
}
