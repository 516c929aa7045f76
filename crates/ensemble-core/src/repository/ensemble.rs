//! Ensemble repository trait definitions.
//!
//! Two views onto the same storage:
//! - [`EnsembleRepository`] serves one-shot user commands (create, pause,
//!   submit, replan, ...). Each call is its own unit of work.
//! - [`EnsembleStore`] / [`EnsembleSession`] serve the scheduling loop. A
//!   session lives for exactly one cycle and commits or rolls back after
//!   every workflow transition.
//!
//! Uses native async fn in traits (Rust 2024 edition, no async_trait macro).

use ensemble_types::ensemble::{Ensemble, EnsembleWorkflow, WorkflowState};
use ensemble_types::error::RepositoryError;

/// Repository trait for user-driven ensemble and workflow mutations.
pub trait EnsembleRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Ensembles
    // -----------------------------------------------------------------------

    /// Insert a new ensemble. The `id` field is ignored and the stored
    /// record (with its assigned id) is returned.
    ///
    /// Returns `RepositoryError::Conflict` if the user already has an
    /// ensemble with that name.
    fn create_ensemble(
        &self,
        ensemble: &Ensemble,
    ) -> impl std::future::Future<Output = Result<Ensemble, RepositoryError>> + Send;

    /// Look up an ensemble by owner and name.
    fn get_ensemble(
        &self,
        username: &str,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Option<Ensemble>, RepositoryError>> + Send;

    /// List all ensembles owned by `username`, ordered by id.
    fn list_ensembles(
        &self,
        username: &str,
    ) -> impl std::future::Future<Output = Result<Vec<Ensemble>, RepositoryError>> + Send;

    /// Persist state, limits and `updated` of an existing ensemble.
    fn update_ensemble(
        &self,
        ensemble: &Ensemble,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Workflows
    // -----------------------------------------------------------------------

    /// Insert a new workflow. The `id` field is ignored.
    ///
    /// Returns `RepositoryError::Conflict` on a duplicate name within the
    /// ensemble.
    fn create_workflow(
        &self,
        workflow: &EnsembleWorkflow,
    ) -> impl std::future::Future<Output = Result<EnsembleWorkflow, RepositoryError>> + Send;

    /// Look up a workflow by name within an ensemble.
    fn get_workflow(
        &self,
        ensemble_id: i64,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Option<EnsembleWorkflow>, RepositoryError>> + Send;

    /// List every workflow of an ensemble, ordered by id.
    fn list_workflows(
        &self,
        ensemble_id: i64,
    ) -> impl std::future::Future<Output = Result<Vec<EnsembleWorkflow>, RepositoryError>> + Send;

    /// Write the workflow's state, `updated`, `wf_uuid` and `submitdir`,
    /// provided the stored state is still `from`.
    ///
    /// Returns `RepositoryError::Stale` if the state has moved on and
    /// `RepositoryError::NotFound` if the row is gone.
    fn update_workflow_state(
        &self,
        workflow: &EnsembleWorkflow,
        from: WorkflowState,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Write only the workflow's priority and `updated`.
    fn update_workflow_priority(
        &self,
        workflow: &EnsembleWorkflow,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}

/// Factory for per-cycle sessions.
pub trait EnsembleStore: Send + Sync {
    type Session: EnsembleSession;

    /// Open a fresh session. Nothing is read or locked until the first call.
    fn open_session(
        &self,
    ) -> impl std::future::Future<Output = Result<Self::Session, RepositoryError>> + Send;
}

/// One cycle's view of the database.
///
/// Writes made through `update_workflow` become visible to other readers
/// only after `commit`. Dropping a session without committing discards
/// pending writes.
pub trait EnsembleSession: Send {
    /// Ensembles with at least one workflow in an actionable state, ordered
    /// by id.
    fn list_actionable_ensembles(
        &mut self,
    ) -> impl std::future::Future<Output = Result<Vec<Ensemble>, RepositoryError>> + Send;

    /// Every workflow of an ensemble, ordered by id.
    fn list_workflows(
        &mut self,
        ensemble_id: i64,
    ) -> impl std::future::Future<Output = Result<Vec<EnsembleWorkflow>, RepositoryError>> + Send;

    /// Stage the workflow's state, `updated`, `wf_uuid` and `submitdir`,
    /// guarded on the stored state still being `from`.
    ///
    /// Returns `RepositoryError::Stale` when another writer changed the
    /// state since it was read. Priority and the other columns are never
    /// written here.
    fn update_workflow(
        &mut self,
        workflow: &EnsembleWorkflow,
        from: WorkflowState,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn commit(&mut self) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn rollback(&mut self)
    -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
