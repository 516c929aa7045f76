//! Admission control and the per-workflow state machine for one ensemble.
//!
//! Each cycle, every actionable workflow (READY, PLANNING, QUEUED, RUNNING)
//! is visited in priority order and advanced by at most one step of:
//!
//! ```text
//! READY    --[can_plan]-->        PLANNING | PLAN_FAILED
//! PLANNING --[planner exited]-->  QUEUED   | PLAN_FAILED
//! QUEUED   --[can_run]-->         RUNNING  | RUN_FAILED
//! RUNNING  --[terminated]-->      SUCCESSFUL | FAILED
//! ```
//!
//! The only exception is the QUEUED fast path: a workflow that just left
//! PLANNING may go straight on to RUNNING when the policy allows it.
//!
//! Every transition is committed as soon as it happens. A transition that
//! launches something (READY -> PLANNING, QUEUED -> RUNNING) is staged before
//! the launch and committed after it, so a concurrent user command makes the
//! staging write fail before anything starts, and RUNNING's `updated` never
//! postdates the submission. Writes are guarded on the state the workflow
//! was read in; a workflow changed by another command since is skipped for
//! this cycle.
//!
//! If any step fails, the session is rolled back and the planning/running
//! counters are restored to their last committed values, so one broken
//! workflow never blocks the rest of the ensemble.

use std::io;

use ensemble_types::ensemble::{Ensemble, EnsembleWorkflow, WorkflowState};
use ensemble_types::error::{LifecycleError, RepositoryError};
use tracing::{debug, error, info, warn};

use crate::repository::ensemble::EnsembleSession;
use crate::workflow::context::{CycleContext, CycleReport, Transition, WorkflowFailure};
use crate::workflow::lifecycle::{LifecycleFactory, WorkflowLifecycle};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while advancing a single workflow or preparing an ensemble.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("failed to prepare ensemble directory: {0}")]
    WorkDir(#[from] io::Error),
}

// ---------------------------------------------------------------------------
// EnsembleProcessor
// ---------------------------------------------------------------------------

/// Drives one ensemble through one cycle.
pub struct EnsembleProcessor<'a, S: EnsembleSession, F: LifecycleFactory> {
    ctx: &'a CycleContext,
    session: &'a mut S,
    factory: &'a F,
    ensemble: Ensemble,
    planning: u32,
    running: u32,
    /// Counter values as of the last successful commit.
    committed: (u32, u32),
    report: CycleReport,
}

impl<'a, S: EnsembleSession, F: LifecycleFactory> EnsembleProcessor<'a, S, F> {
    pub fn new(ctx: &'a CycleContext, session: &'a mut S, factory: &'a F, ensemble: Ensemble) -> Self {
        Self {
            ctx,
            session,
            factory,
            ensemble,
            planning: 0,
            running: 0,
            committed: (0, 0),
            report: CycleReport {
                cycle: ctx.cycle,
                ensembles: 1,
                ..Default::default()
            },
        }
    }

    /// Whether another workflow may start planning.
    pub fn can_plan(&self) -> bool {
        self.ensemble.is_active() && self.planning < self.ensemble.max_planning
    }

    /// Whether another workflow may start running.
    pub fn can_run(&self) -> bool {
        self.ensemble.is_active() && self.running < self.ensemble.max_running
    }

    /// Visit every actionable workflow once.
    ///
    /// Only ensemble-level failures (listing workflows, creating the working
    /// directory) are returned as errors. Per-workflow failures are rolled
    /// back and collected in the report.
    pub async fn run(mut self) -> Result<CycleReport, ProcessError> {
        self.ensure_work_dir().await?;

        let workflows = self.session.list_workflows(self.ensemble.id).await?;

        self.planning = count_in(&workflows, WorkflowState::Planning);
        self.running = count_in(&workflows, WorkflowState::Running);

        let mut actionable: Vec<EnsembleWorkflow> = workflows
            .into_iter()
            .filter(|w| w.state.is_actionable())
            .collect();
        actionable.sort_by_key(|w| (w.priority, w.id));

        debug!(
            workflows = actionable.len(),
            planning = self.planning,
            running = self.running,
            max_planning = self.ensemble.max_planning,
            max_running = self.ensemble.max_running,
            state = %self.ensemble.state,
            "processing ensemble"
        );

        for mut workflow in actionable {
            self.committed = (self.planning, self.running);
            let name = workflow.name.clone();
            let Err(e) = self.advance(&mut workflow).await else {
                continue;
            };

            if let Err(rb) = self.session.rollback().await {
                error!(error = %rb, "rollback failed");
            }
            (self.planning, self.running) = self.committed;

            if matches!(e, ProcessError::Repository(RepositoryError::Stale(_))) {
                warn!(
                    ensemble = %self.ensemble.name,
                    workflow = %name,
                    "workflow changed by another command, skipping until next cycle"
                );
                continue;
            }

            error!(
                ensemble = %self.ensemble.name,
                workflow = %name,
                error = %e,
                "error processing workflow"
            );
            self.report.failures.push(WorkflowFailure {
                ensemble: self.ensemble.name.clone(),
                workflow: name,
                error: e.to_string(),
            });
        }

        Ok(self.report)
    }

    async fn ensure_work_dir(&self) -> Result<(), ProcessError> {
        let dir = self.ctx.ensemble_dir(&self.ensemble.name);
        if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(());
        }
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(0o700);
        builder.create(&dir).await?;
        Ok(())
    }

    async fn advance(&mut self, workflow: &mut EnsembleWorkflow) -> Result<(), ProcessError> {
        match workflow.state {
            WorkflowState::Ready => self.handle_ready(workflow).await,
            WorkflowState::Planning => self.handle_planning(workflow).await,
            WorkflowState::Queued => self.handle_queued(workflow).await,
            WorkflowState::Running => self.handle_running(workflow).await,
            WorkflowState::PlanFailed
            | WorkflowState::RunFailed
            | WorkflowState::Failed
            | WorkflowState::Successful
            | WorkflowState::Aborted => Ok(()),
        }
    }

    async fn handle_ready(&mut self, workflow: &mut EnsembleWorkflow) -> Result<(), ProcessError> {
        if !self.can_plan() {
            debug!(workflow = %workflow.name, "planning deferred");
            return Ok(());
        }

        let from = workflow.state;
        let lifecycle = self.factory.for_workflow(workflow);
        self.stage(workflow, WorkflowState::Planning).await?;
        self.planning += 1;

        match lifecycle.plan().await {
            Ok(()) => info!(workflow = %workflow.name, "planning started"),
            Err(e) => {
                error!(workflow = %workflow.name, error = %e, "unable to plan workflow");
                self.planning -= 1;
                self.stage(workflow, WorkflowState::PlanFailed).await?;
            }
        }
        self.commit(workflow, from).await
    }

    async fn handle_planning(
        &mut self,
        workflow: &mut EnsembleWorkflow,
    ) -> Result<(), ProcessError> {
        let lifecycle = self.factory.for_workflow(workflow);
        if lifecycle.planning().await? {
            debug!(workflow = %workflow.name, "still planning");
            return Ok(());
        }

        self.planning = self.planning.saturating_sub(1);

        if !lifecycle.planning_successful().await? {
            info!(workflow = %workflow.name, "planning failed");
            return self.persist(workflow, WorkflowState::PlanFailed).await;
        }

        let submitdir = lifecycle.find_submitdir().await?;
        let wf_uuid = lifecycle.get_wf_uuid(&submitdir).await?;
        info!(
            workflow = %workflow.name,
            submitdir = %submitdir.display(),
            wf_uuid = %wf_uuid,
            "planning finished"
        );
        workflow.submitdir = Some(submitdir);
        workflow.wf_uuid = Some(wf_uuid);
        self.persist(workflow, WorkflowState::Queued).await?;

        if self.ctx.policy.run_after_planning {
            self.handle_queued(workflow).await?;
        }
        Ok(())
    }

    async fn handle_queued(&mut self, workflow: &mut EnsembleWorkflow) -> Result<(), ProcessError> {
        if !self.can_run() {
            debug!(workflow = %workflow.name, "running deferred");
            return Ok(());
        }

        // Stamp RUNNING first: monitoring only trusts records at or after
        // `updated`, and the workflow may start before the tool returns.
        let from = workflow.state;
        let lifecycle = self.factory.for_workflow(workflow);
        self.stage(workflow, WorkflowState::Running).await?;
        self.running += 1;

        match lifecycle.run().await {
            Ok(()) => info!(workflow = %workflow.name, "workflow submitted"),
            Err(e) => {
                error!(workflow = %workflow.name, error = %e, "unable to run workflow");
                self.running -= 1;
                self.stage(workflow, WorkflowState::RunFailed).await?;
            }
        }
        self.commit(workflow, from).await
    }

    async fn handle_running(&mut self, workflow: &mut EnsembleWorkflow) -> Result<(), ProcessError> {
        let lifecycle = self.factory.for_workflow(workflow);
        if lifecycle.pending().await? {
            debug!(workflow = %workflow.name, "workflow pending");
            return Ok(());
        }
        if lifecycle.running().await? {
            debug!(workflow = %workflow.name, "workflow running");
            return Ok(());
        }

        self.running = self.running.saturating_sub(1);
        let next = if lifecycle.running_successful().await? {
            WorkflowState::Successful
        } else {
            WorkflowState::Failed
        };
        info!(workflow = %workflow.name, state = %next, "workflow finished");
        self.persist(workflow, next).await
    }

    /// Apply a transition and write it through the session without
    /// committing. The write is guarded on the state the workflow had.
    async fn stage(
        &mut self,
        workflow: &mut EnsembleWorkflow,
        next: WorkflowState,
    ) -> Result<(), ProcessError> {
        let from = workflow.state;
        workflow.transition(next);
        self.session.update_workflow(workflow, from).await?;
        Ok(())
    }

    /// Commit whatever was staged for `workflow` since it was in `from`.
    async fn commit(
        &mut self,
        workflow: &EnsembleWorkflow,
        from: WorkflowState,
    ) -> Result<(), ProcessError> {
        self.session.commit().await?;
        self.committed = (self.planning, self.running);

        info!(
            ensemble = %self.ensemble.name,
            workflow = %workflow.name,
            from = %from,
            to = %workflow.state,
            "workflow state changed"
        );
        self.report.transitions.push(Transition {
            ensemble: self.ensemble.name.clone(),
            workflow: workflow.name.clone(),
            from,
            to: workflow.state,
        });
        Ok(())
    }

    async fn persist(
        &mut self,
        workflow: &mut EnsembleWorkflow,
        next: WorkflowState,
    ) -> Result<(), ProcessError> {
        let from = workflow.state;
        self.stage(workflow, next).await?;
        self.commit(workflow, from).await
    }
}

fn count_in(workflows: &[EnsembleWorkflow], state: WorkflowState) -> u32 {
    workflows.iter().filter(|w| w.state == state).count() as u32
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use ensemble_types::ensemble::EnsembleState;
    use ensemble_types::monitoring::MonitorState;

    use super::*;
    use crate::testing::{FakeFactory, FakeStore, PlanOutcome};
    use crate::workflow::context::CyclePolicy;
    use crate::repository::ensemble::EnsembleStore;

    struct Harness {
        store: FakeStore,
        factory: FakeFactory,
        policy: CyclePolicy,
        cycle: u64,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            Self {
                store: FakeStore::default(),
                factory: FakeFactory::default(),
                policy: CyclePolicy::new(dir.path()),
                cycle: 0,
                _dir: dir,
            }
        }

        /// Process every ensemble that has actionable work, like one
        /// manager cycle.
        async fn cycle(&mut self) -> CycleReport {
            self.cycle += 1;
            let ctx = CycleContext::new(self.cycle, self.policy.clone());
            let mut session = self.store.open_session().await.unwrap();
            let mut report = CycleReport::default();
            for ensemble in session.list_actionable_ensembles().await.unwrap() {
                let processor = EnsembleProcessor::new(&ctx, &mut session, &self.factory, ensemble);
                report.merge(processor.run().await.unwrap());
            }
            report
        }

        fn state(&self, name: &str) -> WorkflowState {
            self.store.workflow(name).state
        }
    }

    #[tokio::test]
    async fn test_scenario_successful_run() {
        let mut h = Harness::new();
        let e = h.store.add_ensemble("e1", 1, 1);
        h.store.add_workflow(e, "w1", 0);
        h.factory.script("w1", |s| s.submitdir = PathBuf::from("/tmp/sub1"));

        let report = h.cycle().await;
        assert_eq!(report.transitions_of("w1"), vec![WorkflowState::Planning]);
        assert_eq!(h.factory.plan_calls("w1"), 1);

        // Planner still alive: nothing happens.
        let report = h.cycle().await;
        assert!(report.is_quiet());

        h.factory.script("w1", |s| s.planner_alive = false);
        let report = h.cycle().await;
        assert_eq!(
            report.transitions_of("w1"),
            vec![WorkflowState::Queued, WorkflowState::Running]
        );
        assert_eq!(h.factory.run_submitdirs("w1"), vec![PathBuf::from("/tmp/sub1")]);
        let stored = h.store.workflow("w1");
        assert_eq!(stored.submitdir, Some(PathBuf::from("/tmp/sub1")));
        assert!(stored.wf_uuid.is_some());

        // No monitoring record yet, then started: still RUNNING.
        assert!(h.cycle().await.is_quiet());
        h.factory.script("w1", |s| s.monitor = Some((MonitorState::WorkflowStarted, None)));
        assert!(h.cycle().await.is_quiet());

        h.factory
            .script("w1", |s| s.monitor = Some((MonitorState::WorkflowTerminated, Some(0))));
        let report = h.cycle().await;
        assert_eq!(report.transitions_of("w1"), vec![WorkflowState::Successful]);
        assert_eq!(h.state("w1"), WorkflowState::Successful);
    }

    #[tokio::test]
    async fn test_scenario_planner_exits_nonzero() {
        let mut h = Harness::new();
        let e = h.store.add_ensemble("e1", 1, 1);
        h.store.add_workflow(e, "w1", 0);
        h.factory.script("w1", |s| {
            s.planner_alive = false;
            s.outcome = PlanOutcome::Failed;
        });

        h.cycle().await;
        let report = h.cycle().await;
        assert_eq!(report.transitions_of("w1"), vec![WorkflowState::PlanFailed]);

        // Terminal: the ensemble is no longer actionable.
        assert!(h.cycle().await.is_quiet());
        assert_eq!(h.state("w1"), WorkflowState::PlanFailed);
        assert_eq!(h.factory.plan_calls("w1"), 1);

        // An explicit replan puts it back in the queue.
        h.store.set_state("w1", WorkflowState::Ready);
        let report = h.cycle().await;
        assert_eq!(report.transitions_of("w1"), vec![WorkflowState::Planning]);
        assert_eq!(h.factory.plan_calls("w1"), 2);
    }

    #[tokio::test]
    async fn test_priority_order_picks_lowest_value_first() {
        let mut h = Harness::new();
        let e = h.store.add_ensemble("e1", 1, 1);
        h.store.add_workflow(e, "p5", 5);
        h.store.add_workflow(e, "p1", 1);
        h.store.add_workflow(e, "p3", 3);

        let report = h.cycle().await;
        assert_eq!(report.transitions.len(), 1);
        assert_eq!(report.transitions[0].workflow, "p1");
        assert_eq!(h.state("p5"), WorkflowState::Ready);
        assert_eq!(h.state("p3"), WorkflowState::Ready);
    }

    #[tokio::test]
    async fn test_ties_broken_by_submission_order() {
        let mut h = Harness::new();
        let e = h.store.add_ensemble("e1", 1, 1);
        h.store.add_workflow(e, "first", 2);
        h.store.add_workflow(e, "second", 2);

        h.cycle().await;
        assert_eq!(h.state("first"), WorkflowState::Planning);
        assert_eq!(h.state("second"), WorkflowState::Ready);
    }

    #[tokio::test]
    async fn test_second_workflow_waits_for_planning_slot() {
        let mut h = Harness::new();
        let e = h.store.add_ensemble("e1", 1, 1);
        h.store.add_workflow(e, "w1", 1);
        h.store.add_workflow(e, "w2", 2);
        h.factory.script("w2", |s| s.planner_alive = false);

        h.cycle().await;
        assert_eq!(h.state("w1"), WorkflowState::Planning);
        assert_eq!(h.state("w2"), WorkflowState::Ready);

        h.cycle().await;
        assert_eq!(h.state("w2"), WorkflowState::Ready);

        // W1 leaves PLANNING and takes the only running slot. The freed
        // planning slot goes to W2 in the same cycle.
        h.factory.script("w1", |s| s.planner_alive = false);
        h.cycle().await;
        assert_eq!(h.state("w1"), WorkflowState::Running);
        assert_eq!(h.state("w2"), WorkflowState::Planning);

        // W2 finishes planning but must wait for a running slot.
        h.cycle().await;
        assert_eq!(h.state("w2"), WorkflowState::Queued);
        assert_eq!(h.factory.run_calls("w2"), 0);
    }

    #[tokio::test]
    async fn test_caps_never_exceeded() {
        let mut h = Harness::new();
        let e = h.store.add_ensemble("e1", 2, 1);
        for i in 0..5 {
            let name = format!("w{i}");
            h.store.add_workflow(e, &name, i);
            h.factory.script(&name, |s| s.planner_alive = false);
        }

        for _ in 0..8 {
            h.cycle().await;
            assert!(h.store.count_state(WorkflowState::Planning) <= 2);
            assert!(h.store.count_state(WorkflowState::Running) <= 1);
        }
        assert_eq!(h.store.count_state(WorkflowState::Running), 1);
    }

    #[tokio::test]
    async fn test_paused_and_held_admit_nothing() {
        for state in [EnsembleState::Paused, EnsembleState::Held] {
            let mut h = Harness::new();
            let e = h.store.add_ensemble("e1", 5, 5);
            h.store.add_workflow(e, "ready", 0);
            h.store.add_workflow(e, "planning", 1);
            h.store.set_state("planning", WorkflowState::Planning);
            h.factory.script("planning", |s| s.planner_alive = false);
            h.store.set_ensemble_state(e, state);

            let report = h.cycle().await;

            // In-flight planning is still observed, but nothing new starts.
            assert_eq!(report.transitions_of("planning"), vec![WorkflowState::Queued]);
            assert_eq!(h.state("ready"), WorkflowState::Ready);
            assert_eq!(h.state("planning"), WorkflowState::Queued);
            assert_eq!(h.factory.plan_calls("ready"), 0);
            assert_eq!(h.factory.run_calls("planning"), 0);
        }
    }

    #[tokio::test]
    async fn test_polling_twice_is_idempotent() {
        let mut h = Harness::new();
        let e = h.store.add_ensemble("e1", 1, 1);
        h.store.add_workflow(e, "w1", 0);
        h.store.add_workflow(e, "w2", 1);

        let first = h.cycle().await;
        assert_eq!(first.transitions.len(), 1);
        let second = h.cycle().await;
        assert!(second.is_quiet());
        let third = h.cycle().await;
        assert!(third.is_quiet());
        assert_eq!(h.factory.plan_calls("w1"), 1);
    }

    #[tokio::test]
    async fn test_plan_launch_error_frees_slot() {
        let mut h = Harness::new();
        let e = h.store.add_ensemble("e1", 1, 1);
        h.store.add_workflow(e, "broken", 0);
        h.store.add_workflow(e, "good", 1);
        h.factory.script("broken", |s| s.plan_error = true);

        let report = h.cycle().await;
        assert_eq!(report.transitions_of("broken"), vec![WorkflowState::PlanFailed]);
        assert_eq!(report.transitions_of("good"), vec![WorkflowState::Planning]);
        assert!(report.failures.is_empty());
    }

    #[tokio::test]
    async fn test_run_launch_error_marks_run_failed() {
        let mut h = Harness::new();
        let e = h.store.add_ensemble("e1", 1, 1);
        h.store.add_workflow(e, "w1", 0);
        h.factory.script("w1", |s| {
            s.planner_alive = false;
            s.run_error = true;
        });

        h.cycle().await;
        let report = h.cycle().await;
        assert_eq!(
            report.transitions_of("w1"),
            vec![WorkflowState::Queued, WorkflowState::RunFailed]
        );
    }

    #[tokio::test]
    async fn test_nonzero_workflow_status_is_failed() {
        let mut h = Harness::new();
        let e = h.store.add_ensemble("e1", 1, 1);
        h.store.add_workflow(e, "w1", 0);
        h.factory.script("w1", |s| {
            s.planner_alive = false;
            s.monitor = Some((MonitorState::WorkflowTerminated, Some(3)));
        });

        h.cycle().await;
        h.cycle().await;
        let report = h.cycle().await;
        assert_eq!(report.transitions_of("w1"), vec![WorkflowState::Failed]);
    }

    #[tokio::test]
    async fn test_fast_path_disabled_defers_run() {
        let mut h = Harness::new();
        h.policy.run_after_planning = false;
        let e = h.store.add_ensemble("e1", 1, 1);
        h.store.add_workflow(e, "w1", 0);
        h.factory.script("w1", |s| s.planner_alive = false);

        h.cycle().await;
        let report = h.cycle().await;
        assert_eq!(report.transitions_of("w1"), vec![WorkflowState::Queued]);
        let report = h.cycle().await;
        assert_eq!(report.transitions_of("w1"), vec![WorkflowState::Running]);
    }

    #[tokio::test]
    async fn test_bookkeeping_error_rolls_back_and_continues() {
        let mut h = Harness::new();
        let e = h.store.add_ensemble("e1", 2, 2);
        h.store.add_workflow(e, "w1", 0);
        h.store.add_workflow(e, "w2", 1);
        h.store.set_state("w1", WorkflowState::Planning);
        h.factory.script("w1", |s| {
            s.planner_alive = false;
            s.wf_uuid_missing = true;
        });

        let report = h.cycle().await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].workflow, "w1");
        assert_eq!(h.state("w1"), WorkflowState::Planning);
        // W1 still counts as planning after the rollback, leaving one slot.
        assert_eq!(h.state("w2"), WorkflowState::Planning);
    }

    #[tokio::test]
    async fn test_failed_write_launches_nothing() {
        let mut h = Harness::new();
        let e = h.store.add_ensemble("e1", 1, 1);
        h.store.add_workflow(e, "w1", 0);
        h.store.add_workflow(e, "w2", 1);
        h.store.fail_updates_for("w1");

        let report = h.cycle().await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(h.state("w1"), WorkflowState::Ready);
        assert_eq!(h.factory.plan_calls("w1"), 0);
        // No slot was taken, so W2 can plan.
        assert_eq!(h.state("w2"), WorkflowState::Planning);
    }

    #[tokio::test]
    async fn test_abort_between_read_and_write_wins() {
        let mut h = Harness::new();
        let e = h.store.add_ensemble("e1", 1, 1);
        h.store.add_workflow(e, "w1", 0);
        h.store.add_workflow(e, "w2", 1);
        h.store.change_after_next_read("w1", WorkflowState::Aborted);

        let report = h.cycle().await;
        assert!(report.failures.is_empty());
        assert!(report.transitions_of("w1").is_empty());
        assert_eq!(h.state("w1"), WorkflowState::Aborted);
        assert_eq!(h.factory.plan_calls("w1"), 0);
        // The slot W1 would have taken goes to W2.
        assert_eq!(h.state("w2"), WorkflowState::Planning);
    }

    #[tokio::test]
    async fn test_running_stamped_before_submission() {
        let mut h = Harness::new();
        let e = h.store.add_ensemble("e1", 1, 1);
        h.store.add_workflow(e, "w1", 0);
        h.factory.script("w1", |s| {
            s.planner_alive = false;
            s.run_delay = std::time::Duration::from_millis(50);
        });

        h.cycle().await;
        h.cycle().await;
        assert_eq!(h.state("w1"), WorkflowState::Running);

        // A monitoring record written while the tool was still running must
        // not predate the cutoff.
        let started = h.factory.run_started("w1");
        assert_eq!(started.len(), 1);
        assert!(h.store.workflow("w1").updated <= started[0]);
    }

    #[tokio::test]
    async fn test_run_error_after_staging_commits_run_failed() {
        let mut h = Harness::new();
        h.policy.run_after_planning = false;
        let e = h.store.add_ensemble("e1", 1, 2);
        h.store.add_workflow(e, "w1", 0);
        h.store.add_workflow(e, "w2", 1);
        h.store.set_state("w1", WorkflowState::Queued);
        h.store.set_state("w2", WorkflowState::Queued);
        h.factory.script("w1", |s| s.run_error = true);
        for name in ["w1", "w2"] {
            h.store.set_submitdir(name, PathBuf::from("/tmp/sub"));
        }

        let report = h.cycle().await;
        assert_eq!(report.transitions_of("w1"), vec![WorkflowState::RunFailed]);
        assert_eq!(report.transitions_of("w2"), vec![WorkflowState::Running]);
        assert_eq!(report.transitions[0].from, WorkflowState::Queued);
        // The failed run gave its slot back.
        assert_eq!(h.store.count_state(WorkflowState::Running), 1);
    }

    #[tokio::test]
    async fn test_work_dir_created() {
        let mut h = Harness::new();
        let e = h.store.add_ensemble("e1", 1, 1);
        h.store.add_workflow(e, "w1", 0);
        h.cycle().await;

        let dir = h.policy.work_root.join("ensembles").join("e1");
        assert!(dir.is_dir());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&dir).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }
}
