//! In-memory fakes of the repository and lifecycle ports for core tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use ensemble_types::ensemble::{Ensemble, EnsembleState, EnsembleWorkflow, WorkflowState};
use ensemble_types::error::{LifecycleError, RepositoryError};
use ensemble_types::monitoring::MonitorState;
use uuid::Uuid;

use crate::repository::ensemble::{EnsembleRepository, EnsembleSession, EnsembleStore};
use crate::workflow::lifecycle::{LifecycleFactory, WorkflowLifecycle};

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeDb {
    ensembles: Vec<Ensemble>,
    workflows: Vec<EnsembleWorkflow>,
    next_id: i64,
    fail_updates_for: Option<String>,
    /// Applied right after the next read, like a command that lands between
    /// a read and the write based on it.
    change_after_read: Option<(String, WorkflowState)>,
}

impl FakeDb {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn after_read(&mut self) {
        if let Some((name, state)) = self.change_after_read.take() {
            if let Some(w) = self.workflows.iter_mut().find(|w| w.name == name) {
                w.transition(state);
            }
        }
    }

    fn stored_state(&self, id: i64) -> Result<WorkflowState, RepositoryError> {
        self.workflows
            .iter()
            .find(|w| w.id == id)
            .map(|w| w.state)
            .ok_or(RepositoryError::NotFound)
    }
}

fn stale(workflow: &EnsembleWorkflow, from: WorkflowState) -> RepositoryError {
    RepositoryError::Stale(format!("workflow {} is no longer {from}", workflow.id))
}

/// Copy the columns a state write touches.
fn apply_state(target: &mut EnsembleWorkflow, source: &EnsembleWorkflow) {
    target.state = source.state;
    target.updated = source.updated;
    target.wf_uuid = source.wf_uuid;
    target.submitdir = source.submitdir.clone();
}

#[derive(Clone, Default)]
pub struct FakeStore {
    db: Arc<Mutex<FakeDb>>,
}

impl FakeStore {
    pub fn add_ensemble(&self, name: &str, max_planning: u32, max_running: u32) -> i64 {
        let mut db = self.db.lock().unwrap();
        let id = db.next_id();
        let now = Utc::now();
        db.ensembles.push(Ensemble {
            id,
            username: "tester".to_string(),
            name: name.to_string(),
            created: now,
            updated: now,
            state: EnsembleState::Active,
            max_planning,
            max_running,
        });
        id
    }

    pub fn add_workflow(&self, ensemble_id: i64, name: &str, priority: i32) -> i64 {
        let mut db = self.db.lock().unwrap();
        let id = db.next_id();
        let now = Utc::now();
        db.workflows.push(EnsembleWorkflow {
            id,
            ensemble_id,
            name: name.to_string(),
            created: now,
            updated: now,
            state: WorkflowState::Ready,
            priority,
            plan_command: format!("./plan-{name}.sh"),
            basedir: PathBuf::from("/work").join(name),
            wf_uuid: None,
            submitdir: None,
        });
        id
    }

    pub fn workflow(&self, name: &str) -> EnsembleWorkflow {
        let db = self.db.lock().unwrap();
        db.workflows
            .iter()
            .find(|w| w.name == name)
            .cloned()
            .unwrap()
    }

    pub fn ensemble(&self, id: i64) -> Ensemble {
        let db = self.db.lock().unwrap();
        db.ensembles.iter().find(|e| e.id == id).cloned().unwrap()
    }

    pub fn set_state(&self, name: &str, state: WorkflowState) {
        let mut db = self.db.lock().unwrap();
        if let Some(w) = db.workflows.iter_mut().find(|w| w.name == name) {
            w.transition(state);
        }
    }

    pub fn set_submitdir(&self, name: &str, submitdir: PathBuf) {
        let mut db = self.db.lock().unwrap();
        if let Some(w) = db.workflows.iter_mut().find(|w| w.name == name) {
            w.submitdir = Some(submitdir);
        }
    }

    pub fn set_ensemble_state(&self, id: i64, state: EnsembleState) {
        let mut db = self.db.lock().unwrap();
        if let Some(e) = db.ensembles.iter_mut().find(|e| e.id == id) {
            e.state = state;
        }
    }

    pub fn count_state(&self, state: WorkflowState) -> usize {
        let db = self.db.lock().unwrap();
        db.workflows.iter().filter(|w| w.state == state).count()
    }

    pub fn fail_updates_for(&self, name: &str) {
        self.db.lock().unwrap().fail_updates_for = Some(name.to_string());
    }

    pub fn change_after_next_read(&self, name: &str, state: WorkflowState) {
        self.db.lock().unwrap().change_after_read = Some((name.to_string(), state));
    }
}

impl EnsembleStore for FakeStore {
    type Session = FakeSession;

    async fn open_session(&self) -> Result<FakeSession, RepositoryError> {
        Ok(FakeSession {
            db: Arc::clone(&self.db),
            staged: Vec::new(),
        })
    }
}

pub struct FakeSession {
    db: Arc<Mutex<FakeDb>>,
    staged: Vec<EnsembleWorkflow>,
}

impl EnsembleSession for FakeSession {
    async fn list_actionable_ensembles(&mut self) -> Result<Vec<Ensemble>, RepositoryError> {
        let db = self.db.lock().unwrap();
        Ok(db
            .ensembles
            .iter()
            .filter(|e| {
                db.workflows
                    .iter()
                    .any(|w| w.ensemble_id == e.id && w.state.is_actionable())
            })
            .cloned()
            .collect())
    }

    async fn list_workflows(
        &mut self,
        ensemble_id: i64,
    ) -> Result<Vec<EnsembleWorkflow>, RepositoryError> {
        let mut db = self.db.lock().unwrap();
        let workflows = db
            .workflows
            .iter()
            .filter(|w| w.ensemble_id == ensemble_id)
            .cloned()
            .collect();
        db.after_read();
        Ok(workflows)
    }

    async fn update_workflow(
        &mut self,
        workflow: &EnsembleWorkflow,
        from: WorkflowState,
    ) -> Result<(), RepositoryError> {
        let db = self.db.lock().unwrap();
        if db.fail_updates_for.as_deref() == Some(workflow.name.as_str()) {
            return Err(RepositoryError::Query("injected failure".to_string()));
        }
        let current = match self.staged.iter().rev().find(|w| w.id == workflow.id) {
            Some(staged) => staged.state,
            None => db.stored_state(workflow.id)?,
        };
        if current != from {
            return Err(stale(workflow, from));
        }
        self.staged.push(workflow.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), RepositoryError> {
        let mut db = self.db.lock().unwrap();
        for staged in self.staged.drain(..) {
            if let Some(w) = db.workflows.iter_mut().find(|w| w.id == staged.id) {
                apply_state(w, &staged);
            }
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), RepositoryError> {
        self.staged.clear();
        Ok(())
    }
}

impl EnsembleRepository for FakeStore {
    async fn create_ensemble(&self, ensemble: &Ensemble) -> Result<Ensemble, RepositoryError> {
        let mut db = self.db.lock().unwrap();
        if db
            .ensembles
            .iter()
            .any(|e| e.username == ensemble.username && e.name == ensemble.name)
        {
            return Err(RepositoryError::Conflict(ensemble.name.clone()));
        }
        let mut stored = ensemble.clone();
        stored.id = db.next_id();
        db.ensembles.push(stored.clone());
        Ok(stored)
    }

    async fn get_ensemble(
        &self,
        username: &str,
        name: &str,
    ) -> Result<Option<Ensemble>, RepositoryError> {
        let db = self.db.lock().unwrap();
        Ok(db
            .ensembles
            .iter()
            .find(|e| e.username == username && e.name == name)
            .cloned())
    }

    async fn list_ensembles(&self, username: &str) -> Result<Vec<Ensemble>, RepositoryError> {
        let db = self.db.lock().unwrap();
        Ok(db
            .ensembles
            .iter()
            .filter(|e| e.username == username)
            .cloned()
            .collect())
    }

    async fn update_ensemble(&self, ensemble: &Ensemble) -> Result<(), RepositoryError> {
        let mut db = self.db.lock().unwrap();
        match db.ensembles.iter_mut().find(|e| e.id == ensemble.id) {
            Some(e) => {
                *e = ensemble.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn create_workflow(
        &self,
        workflow: &EnsembleWorkflow,
    ) -> Result<EnsembleWorkflow, RepositoryError> {
        let mut db = self.db.lock().unwrap();
        if db
            .workflows
            .iter()
            .any(|w| w.ensemble_id == workflow.ensemble_id && w.name == workflow.name)
        {
            return Err(RepositoryError::Conflict(workflow.name.clone()));
        }
        let mut stored = workflow.clone();
        stored.id = db.next_id();
        db.workflows.push(stored.clone());
        Ok(stored)
    }

    async fn get_workflow(
        &self,
        ensemble_id: i64,
        name: &str,
    ) -> Result<Option<EnsembleWorkflow>, RepositoryError> {
        let mut db = self.db.lock().unwrap();
        let found = db
            .workflows
            .iter()
            .find(|w| w.ensemble_id == ensemble_id && w.name == name)
            .cloned();
        db.after_read();
        Ok(found)
    }

    async fn list_workflows(
        &self,
        ensemble_id: i64,
    ) -> Result<Vec<EnsembleWorkflow>, RepositoryError> {
        let db = self.db.lock().unwrap();
        Ok(db
            .workflows
            .iter()
            .filter(|w| w.ensemble_id == ensemble_id)
            .cloned()
            .collect())
    }

    async fn update_workflow_state(
        &self,
        workflow: &EnsembleWorkflow,
        from: WorkflowState,
    ) -> Result<(), RepositoryError> {
        let mut db = self.db.lock().unwrap();
        let w = db
            .workflows
            .iter_mut()
            .find(|w| w.id == workflow.id)
            .ok_or(RepositoryError::NotFound)?;
        if w.state != from {
            return Err(stale(workflow, from));
        }
        apply_state(w, workflow);
        Ok(())
    }

    async fn update_workflow_priority(
        &self,
        workflow: &EnsembleWorkflow,
    ) -> Result<(), RepositoryError> {
        let mut db = self.db.lock().unwrap();
        let w = db
            .workflows
            .iter_mut()
            .find(|w| w.id == workflow.id)
            .ok_or(RepositoryError::NotFound)?;
        w.priority = workflow.priority;
        w.updated = workflow.updated;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOutcome {
    Success,
    Failed,
}

/// Scripted external world for one workflow, plus a record of calls.
#[derive(Debug, Clone)]
pub struct FakeScript {
    pub planner_alive: bool,
    pub outcome: PlanOutcome,
    pub submitdir: PathBuf,
    pub plan_error: bool,
    pub run_error: bool,
    pub wf_uuid_missing: bool,
    pub monitor: Option<(MonitorState, Option<i32>)>,
    /// How long the submission tool takes.
    pub run_delay: Duration,
    plan_calls: usize,
    run_submitdirs: Vec<PathBuf>,
    run_started: Vec<DateTime<Utc>>,
}

impl Default for FakeScript {
    fn default() -> Self {
        Self {
            planner_alive: true,
            outcome: PlanOutcome::Success,
            submitdir: PathBuf::from("/tmp/submit"),
            plan_error: false,
            run_error: false,
            wf_uuid_missing: false,
            monitor: None,
            run_delay: Duration::ZERO,
            plan_calls: 0,
            run_submitdirs: Vec::new(),
            run_started: Vec::new(),
        }
    }
}

#[derive(Clone, Default)]
pub struct FakeFactory {
    scripts: Arc<Mutex<HashMap<String, FakeScript>>>,
}

impl FakeFactory {
    pub fn script(&self, name: &str, f: impl FnOnce(&mut FakeScript)) {
        let mut scripts = self.scripts.lock().unwrap();
        f(scripts.entry(name.to_string()).or_default());
    }

    pub fn plan_calls(&self, name: &str) -> usize {
        self.with(name, |s| s.plan_calls)
    }

    pub fn run_calls(&self, name: &str) -> usize {
        self.with(name, |s| s.run_submitdirs.len())
    }

    pub fn run_submitdirs(&self, name: &str) -> Vec<PathBuf> {
        self.with(name, |s| s.run_submitdirs.clone())
    }

    /// When each `run()` call began.
    pub fn run_started(&self, name: &str) -> Vec<DateTime<Utc>> {
        self.with(name, |s| s.run_started.clone())
    }

    fn with<T>(&self, name: &str, f: impl FnOnce(&mut FakeScript) -> T) -> T {
        let mut scripts = self.scripts.lock().unwrap();
        f(scripts.entry(name.to_string()).or_default())
    }
}

impl LifecycleFactory for FakeFactory {
    type Lifecycle = FakeLifecycle;

    fn for_workflow(&self, workflow: &EnsembleWorkflow) -> FakeLifecycle {
        FakeLifecycle {
            workflow: workflow.clone(),
            factory: self.clone(),
        }
    }
}

pub struct FakeLifecycle {
    workflow: EnsembleWorkflow,
    factory: FakeFactory,
}

impl FakeLifecycle {
    fn with<T>(&self, f: impl FnOnce(&mut FakeScript) -> T) -> T {
        self.factory.with(&self.workflow.name, f)
    }
}

impl WorkflowLifecycle for FakeLifecycle {
    async fn plan(&self) -> Result<(), LifecycleError> {
        self.with(|s| {
            s.plan_calls += 1;
            if s.plan_error {
                Err(LifecycleError::LaunchExit(1))
            } else {
                Ok(())
            }
        })
    }

    async fn planning(&self) -> Result<bool, LifecycleError> {
        Ok(self.with(|s| s.planner_alive))
    }

    async fn planning_successful(&self) -> Result<bool, LifecycleError> {
        Ok(self.with(|s| s.outcome == PlanOutcome::Success))
    }

    async fn find_submitdir(&self) -> Result<PathBuf, LifecycleError> {
        Ok(self.with(|s| s.submitdir.clone()))
    }

    async fn get_wf_uuid(&self, _submitdir: &Path) -> Result<Uuid, LifecycleError> {
        if self.with(|s| s.wf_uuid_missing) {
            return Err(LifecycleError::bookkeeping("wf_uuid not found in braindump"));
        }
        Ok(Uuid::from_u128(self.workflow.id as u128))
    }

    async fn run(&self) -> Result<(), LifecycleError> {
        let submitdir = self
            .workflow
            .submitdir
            .clone()
            .ok_or_else(|| LifecycleError::bookkeeping("submitdir not set"))?;
        let (delay, failed) = self.with(|s| {
            s.run_started.push(Utc::now());
            s.run_submitdirs.push(submitdir);
            (s.run_delay, s.run_error)
        });
        tokio::time::sleep(delay).await;
        if failed {
            return Err(LifecycleError::Submission("condor_submit failed".to_string()));
        }
        Ok(())
    }

    async fn pending(&self) -> Result<bool, LifecycleError> {
        Ok(self.with(|s| s.monitor.is_none()))
    }

    async fn running(&self) -> Result<bool, LifecycleError> {
        Ok(self.with(|s| match &s.monitor {
            None => true,
            Some((state, _)) => state.is_started(),
        }))
    }

    async fn running_successful(&self) -> Result<bool, LifecycleError> {
        self.with(|s| match &s.monitor {
            Some((state, status)) if !state.is_started() => Ok(*status == Some(0)),
            _ => Err(LifecycleError::StillRunning),
        })
    }
}
