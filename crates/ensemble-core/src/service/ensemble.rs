//! Ensemble management service.
//!
//! Validates and applies the user commands that mutate ensembles and their
//! workflows. Every change is a plain database update; the running manager
//! picks it up on its next cycle.

use chrono::Utc;
use ensemble_types::ensemble::{
    CreateEnsembleRequest, Ensemble, EnsembleState, EnsembleWorkflow, SubmitWorkflowRequest,
    WorkflowCommand, WorkflowState, validate_name,
};
use ensemble_types::error::{EnsembleError, RepositoryError};

use crate::repository::ensemble::EnsembleRepository;

/// Default cap for both planning and running on a new ensemble.
pub const DEFAULT_MAX_ACTIVE: u32 = 1;

/// Service for one user's ensembles.
///
/// Generic over the repository trait -- ensemble-core never depends on
/// ensemble-infra.
pub struct EnsembleService<R: EnsembleRepository> {
    repo: R,
    username: String,
}

impl<R: EnsembleRepository> EnsembleService<R> {
    pub fn new(repo: R, username: impl Into<String>) -> Self {
        Self {
            repo,
            username: username.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    // -----------------------------------------------------------------------
    // Ensembles
    // -----------------------------------------------------------------------

    /// Create a new ACTIVE ensemble.
    pub async fn create_ensemble(
        &self,
        request: CreateEnsembleRequest,
    ) -> Result<Ensemble, EnsembleError> {
        validate_name(&request.name).map_err(EnsembleError::InvalidName)?;
        let max_planning = check_limit("max_planning", request.max_planning)?;
        let max_running = check_limit("max_running", request.max_running)?;

        let now = Utc::now();
        let ensemble = Ensemble {
            id: 0,
            username: request.username,
            name: request.name,
            created: now,
            updated: now,
            state: EnsembleState::Active,
            max_planning: max_planning.unwrap_or(DEFAULT_MAX_ACTIVE),
            max_running: max_running.unwrap_or(DEFAULT_MAX_ACTIVE),
        };

        self.repo
            .create_ensemble(&ensemble)
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => EnsembleError::EnsembleExists(ensemble.name.clone()),
                other => storage(other),
            })
    }

    pub async fn list_ensembles(&self) -> Result<Vec<Ensemble>, EnsembleError> {
        self.repo.list_ensembles(&self.username).await.map_err(storage)
    }

    pub async fn get_ensemble(&self, name: &str) -> Result<Ensemble, EnsembleError> {
        self.repo
            .get_ensemble(&self.username, name)
            .await
            .map_err(storage)?
            .ok_or_else(|| EnsembleError::EnsembleNotFound(name.to_string()))
    }

    /// Pause, hold or activate an ensemble.
    pub async fn set_ensemble_state(
        &self,
        name: &str,
        state: EnsembleState,
    ) -> Result<Ensemble, EnsembleError> {
        let mut ensemble = self.get_ensemble(name).await?;
        ensemble.state = state;
        ensemble.updated = Utc::now();
        self.repo.update_ensemble(&ensemble).await.map_err(storage)?;
        Ok(ensemble)
    }

    /// Change the planning and/or running caps.
    pub async fn configure_ensemble(
        &self,
        name: &str,
        max_planning: Option<u32>,
        max_running: Option<u32>,
    ) -> Result<Ensemble, EnsembleError> {
        let max_planning = check_limit("max_planning", max_planning)?;
        let max_running = check_limit("max_running", max_running)?;

        let mut ensemble = self.get_ensemble(name).await?;
        if let Some(n) = max_planning {
            ensemble.max_planning = n;
        }
        if let Some(n) = max_running {
            ensemble.max_running = n;
        }
        ensemble.updated = Utc::now();
        self.repo.update_ensemble(&ensemble).await.map_err(storage)?;
        Ok(ensemble)
    }

    // -----------------------------------------------------------------------
    // Workflows
    // -----------------------------------------------------------------------

    /// Add a READY workflow to an ensemble.
    pub async fn submit_workflow(
        &self,
        ensemble_name: &str,
        request: SubmitWorkflowRequest,
    ) -> Result<EnsembleWorkflow, EnsembleError> {
        validate_name(&request.name).map_err(EnsembleError::InvalidName)?;
        if !request.basedir.is_absolute() {
            return Err(EnsembleError::InvalidBasedir(
                request.basedir.display().to_string(),
            ));
        }
        let ensemble = self.get_ensemble(ensemble_name).await?;

        let now = Utc::now();
        let workflow = EnsembleWorkflow {
            id: 0,
            ensemble_id: ensemble.id,
            name: request.name,
            created: now,
            updated: now,
            state: WorkflowState::Ready,
            priority: request.priority,
            plan_command: request.plan_command,
            basedir: request.basedir,
            wf_uuid: None,
            submitdir: None,
        };

        self.repo
            .create_workflow(&workflow)
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => EnsembleError::WorkflowExists(workflow.name.clone()),
                other => storage(other),
            })
    }

    pub async fn list_workflows(
        &self,
        ensemble_name: &str,
    ) -> Result<Vec<EnsembleWorkflow>, EnsembleError> {
        let ensemble = self.get_ensemble(ensemble_name).await?;
        self.repo.list_workflows(ensemble.id).await.map_err(storage)
    }

    pub async fn get_workflow(
        &self,
        ensemble_name: &str,
        workflow_name: &str,
    ) -> Result<EnsembleWorkflow, EnsembleError> {
        let ensemble = self.get_ensemble(ensemble_name).await?;
        self.repo
            .get_workflow(ensemble.id, workflow_name)
            .await
            .map_err(storage)?
            .ok_or_else(|| {
                EnsembleError::WorkflowNotFound(format!("{ensemble_name}.{workflow_name}"))
            })
    }

    /// Apply replan, rerun or abort.
    ///
    /// Replan starts a fresh planning attempt, so the previous submit
    /// directory and UUID are forgotten. Rerun keeps them. The write only
    /// lands if the workflow is still in the state the command was checked
    /// against; a manager cycle that moved it in between wins.
    pub async fn change_workflow_state(
        &self,
        ensemble_name: &str,
        workflow_name: &str,
        command: WorkflowCommand,
    ) -> Result<EnsembleWorkflow, EnsembleError> {
        let mut workflow = self.get_workflow(ensemble_name, workflow_name).await?;
        let from = workflow.state;
        if !command.allowed_from(from) {
            return Err(EnsembleError::InvalidStateChange {
                command: command.to_string(),
                from,
            });
        }

        if command == WorkflowCommand::Replan {
            workflow.submitdir = None;
            workflow.wf_uuid = None;
        }
        workflow.transition(command.target());
        self.repo
            .update_workflow_state(&workflow, from)
            .await
            .map_err(|e| match e {
                RepositoryError::Stale(_) => {
                    EnsembleError::ConcurrentChange(format!("{ensemble_name}.{workflow_name}"))
                }
                other => storage(other),
            })?;
        Ok(workflow)
    }

    pub async fn set_priority(
        &self,
        ensemble_name: &str,
        workflow_name: &str,
        priority: i32,
    ) -> Result<EnsembleWorkflow, EnsembleError> {
        let mut workflow = self.get_workflow(ensemble_name, workflow_name).await?;
        workflow.priority = priority;
        workflow.touch();
        self.repo
            .update_workflow_priority(&workflow)
            .await
            .map_err(storage)?;
        Ok(workflow)
    }
}

fn check_limit(field: &'static str, value: Option<u32>) -> Result<Option<u32>, EnsembleError> {
    match value {
        Some(0) => Err(EnsembleError::InvalidLimit { field, value: 0 }),
        other => Ok(other),
    }
}

fn storage(e: RepositoryError) -> EnsembleError {
    EnsembleError::StorageError(e.to_string())
}
