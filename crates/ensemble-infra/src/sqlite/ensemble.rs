//! SQLite ensemble repository implementation.
//!
//! Implements `EnsembleRepository` (user commands) and `EnsembleStore` /
//! `EnsembleSession` (scheduling loop) from `ensemble-core` using sqlx with
//! split read/write pools.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use ensemble_core::repository::ensemble::{EnsembleRepository, EnsembleSession, EnsembleStore};
use ensemble_types::ensemble::{Ensemble, EnsembleState, EnsembleWorkflow, WorkflowState};
use ensemble_types::error::RepositoryError;
use sqlx::sqlite::{Sqlite, SqliteConnection, SqliteRow};
use sqlx::{Row, Transaction};
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of the ensemble repository traits.
#[derive(Clone)]
pub struct SqliteEnsembleRepository {
    pool: DatabasePool,
}

impl SqliteEnsembleRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct EnsembleRow {
    id: i64,
    username: String,
    name: String,
    created: String,
    updated: String,
    state: String,
    max_planning: i64,
    max_running: i64,
}

impl EnsembleRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            name: row.try_get("name")?,
            created: row.try_get("created")?,
            updated: row.try_get("updated")?,
            state: row.try_get("state")?,
            max_planning: row.try_get("max_planning")?,
            max_running: row.try_get("max_running")?,
        })
    }

    fn into_ensemble(self) -> Result<Ensemble, RepositoryError> {
        let state: EnsembleState = self.state.parse().map_err(RepositoryError::Query)?;
        Ok(Ensemble {
            id: self.id,
            username: self.username,
            name: self.name,
            created: parse_datetime(&self.created)?,
            updated: parse_datetime(&self.updated)?,
            state,
            max_planning: to_limit(self.max_planning)?,
            max_running: to_limit(self.max_running)?,
        })
    }
}

struct WorkflowRow {
    id: i64,
    ensemble_id: i64,
    name: String,
    created: String,
    updated: String,
    state: String,
    priority: i64,
    plan_command: String,
    basedir: String,
    wf_uuid: Option<String>,
    submitdir: Option<String>,
}

impl WorkflowRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            ensemble_id: row.try_get("ensemble_id")?,
            name: row.try_get("name")?,
            created: row.try_get("created")?,
            updated: row.try_get("updated")?,
            state: row.try_get("state")?,
            priority: row.try_get("priority")?,
            plan_command: row.try_get("plan_command")?,
            basedir: row.try_get("basedir")?,
            wf_uuid: row.try_get("wf_uuid")?,
            submitdir: row.try_get("submitdir")?,
        })
    }

    fn into_workflow(self) -> Result<EnsembleWorkflow, RepositoryError> {
        let state: WorkflowState = self.state.parse().map_err(RepositoryError::Query)?;
        let wf_uuid = self.wf_uuid.as_deref().map(parse_uuid).transpose()?;
        let priority = i32::try_from(self.priority)
            .map_err(|_| RepositoryError::Query(format!("priority out of range: {}", self.priority)))?;

        Ok(EnsembleWorkflow {
            id: self.id,
            ensemble_id: self.ensemble_id,
            name: self.name,
            created: parse_datetime(&self.created)?,
            updated: parse_datetime(&self.updated)?,
            state,
            priority,
            plan_command: self.plan_command,
            basedir: PathBuf::from(self.basedir),
            wf_uuid,
            submitdir: self.submitdir.map(PathBuf::from),
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn to_limit(n: i64) -> Result<u32, RepositoryError> {
    u32::try_from(n).map_err(|_| RepositoryError::Query(format!("invalid limit: {n}")))
}

fn query_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

fn path_str(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}

/// `'READY','PLANNING',...` for use in an `IN (...)` clause.
fn actionable_states_sql() -> String {
    WorkflowState::ACTIONABLE
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(",")
}

fn rows_to_ensembles(rows: &[SqliteRow]) -> Result<Vec<Ensemble>, RepositoryError> {
    let mut ensembles = Vec::with_capacity(rows.len());
    for row in rows {
        let r = EnsembleRow::from_row(row).map_err(query_err)?;
        ensembles.push(r.into_ensemble()?);
    }
    Ok(ensembles)
}

fn rows_to_workflows(rows: &[SqliteRow]) -> Result<Vec<EnsembleWorkflow>, RepositoryError> {
    let mut workflows = Vec::with_capacity(rows.len());
    for row in rows {
        let r = WorkflowRow::from_row(row).map_err(query_err)?;
        workflows.push(r.into_workflow()?);
    }
    Ok(workflows)
}

/// State write guarded on the state the caller read. Priority is left to
/// user commands.
const UPDATE_WORKFLOW_STATE_SQL: &str = "UPDATE ensemble_workflow
     SET state = ?, updated = ?, wf_uuid = ?, submitdir = ?
     WHERE id = ? AND state = ?";

/// Run the guarded state write on `conn`, telling a vanished row apart
/// from one whose state moved on.
async fn write_workflow_state(
    conn: &mut SqliteConnection,
    workflow: &EnsembleWorkflow,
    from: WorkflowState,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(UPDATE_WORKFLOW_STATE_SQL)
        .bind(workflow.state.as_str())
        .bind(format_datetime(&workflow.updated))
        .bind(workflow.wf_uuid.map(|u| u.to_string()))
        .bind(workflow.submitdir.as_deref().map(path_str))
        .bind(workflow.id)
        .bind(from.as_str())
        .execute(&mut *conn)
        .await
        .map_err(query_err)?;

    if result.rows_affected() > 0 {
        return Ok(());
    }

    let current: Option<String> = sqlx::query_scalar("SELECT state FROM ensemble_workflow WHERE id = ?")
        .bind(workflow.id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(query_err)?;
    match current {
        None => Err(RepositoryError::NotFound),
        Some(state) => Err(RepositoryError::Stale(format!(
            "workflow {} is {state}, expected {from}",
            workflow.id
        ))),
    }
}

fn unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.message().contains("UNIQUE"))
}

// ---------------------------------------------------------------------------
// EnsembleRepository impl
// ---------------------------------------------------------------------------

impl EnsembleRepository for SqliteEnsembleRepository {
    async fn create_ensemble(&self, ensemble: &Ensemble) -> Result<Ensemble, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO ensemble (username, name, created, updated, state, max_planning, max_running)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&ensemble.username)
        .bind(&ensemble.name)
        .bind(format_datetime(&ensemble.created))
        .bind(format_datetime(&ensemble.updated))
        .bind(ensemble.state.as_str())
        .bind(i64::from(ensemble.max_planning))
        .bind(i64::from(ensemble.max_running))
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(done) => {
                let mut stored = ensemble.clone();
                stored.id = done.last_insert_rowid();
                Ok(stored)
            }
            Err(e) if unique_violation(&e) => Err(RepositoryError::Conflict(format!(
                "ensemble '{}' already exists",
                ensemble.name
            ))),
            Err(e) => Err(query_err(e)),
        }
    }

    async fn get_ensemble(
        &self,
        username: &str,
        name: &str,
    ) -> Result<Option<Ensemble>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM ensemble WHERE username = ? AND name = ?")
            .bind(username)
            .bind(name)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => {
                let r = EnsembleRow::from_row(&row).map_err(query_err)?;
                Ok(Some(r.into_ensemble()?))
            }
            None => Ok(None),
        }
    }

    async fn list_ensembles(&self, username: &str) -> Result<Vec<Ensemble>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM ensemble WHERE username = ? ORDER BY id ASC")
            .bind(username)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        rows_to_ensembles(&rows)
    }

    async fn update_ensemble(&self, ensemble: &Ensemble) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE ensemble SET state = ?, max_planning = ?, max_running = ?, updated = ?
             WHERE id = ?",
        )
        .bind(ensemble.state.as_str())
        .bind(i64::from(ensemble.max_planning))
        .bind(i64::from(ensemble.max_running))
        .bind(format_datetime(&ensemble.updated))
        .bind(ensemble.id)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn create_workflow(
        &self,
        workflow: &EnsembleWorkflow,
    ) -> Result<EnsembleWorkflow, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO ensemble_workflow
               (ensemble_id, name, basedir, created, updated, state, priority, wf_uuid, submitdir, plan_command)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(workflow.ensemble_id)
        .bind(&workflow.name)
        .bind(path_str(&workflow.basedir))
        .bind(format_datetime(&workflow.created))
        .bind(format_datetime(&workflow.updated))
        .bind(workflow.state.as_str())
        .bind(workflow.priority)
        .bind(workflow.wf_uuid.map(|u| u.to_string()))
        .bind(workflow.submitdir.as_deref().map(path_str))
        .bind(&workflow.plan_command)
        .execute(&self.pool.writer)
        .await;

        match result {
            Ok(done) => {
                let mut stored = workflow.clone();
                stored.id = done.last_insert_rowid();
                Ok(stored)
            }
            Err(e) if unique_violation(&e) => Err(RepositoryError::Conflict(format!(
                "workflow '{}' already exists",
                workflow.name
            ))),
            Err(e) => Err(query_err(e)),
        }
    }

    async fn get_workflow(
        &self,
        ensemble_id: i64,
        name: &str,
    ) -> Result<Option<EnsembleWorkflow>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM ensemble_workflow WHERE ensemble_id = ? AND name = ?")
            .bind(ensemble_id)
            .bind(name)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => {
                let r = WorkflowRow::from_row(&row).map_err(query_err)?;
                Ok(Some(r.into_workflow()?))
            }
            None => Ok(None),
        }
    }

    async fn list_workflows(
        &self,
        ensemble_id: i64,
    ) -> Result<Vec<EnsembleWorkflow>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM ensemble_workflow WHERE ensemble_id = ? ORDER BY id ASC")
            .bind(ensemble_id)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        rows_to_workflows(&rows)
    }

    async fn update_workflow_state(
        &self,
        workflow: &EnsembleWorkflow,
        from: WorkflowState,
    ) -> Result<(), RepositoryError> {
        let mut conn = self.pool.writer.acquire().await.map_err(query_err)?;
        write_workflow_state(&mut *conn, workflow, from).await
    }

    async fn update_workflow_priority(
        &self,
        workflow: &EnsembleWorkflow,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE ensemble_workflow SET priority = ?, updated = ? WHERE id = ?")
            .bind(workflow.priority)
            .bind(format_datetime(&workflow.updated))
            .bind(workflow.id)
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Session (scheduling loop)
// ---------------------------------------------------------------------------

impl EnsembleStore for SqliteEnsembleRepository {
    type Session = SqliteEnsembleSession;

    async fn open_session(&self) -> Result<SqliteEnsembleSession, RepositoryError> {
        Ok(SqliteEnsembleSession {
            pool: self.pool.clone(),
            tx: None,
        })
    }
}

/// One cycle's session.
///
/// Reads go to the reader pool and only ever see committed data. Writes
/// lazily open a transaction on the writer connection which is held until
/// `commit` or `rollback`.
pub struct SqliteEnsembleSession {
    pool: DatabasePool,
    tx: Option<Transaction<'static, Sqlite>>,
}

impl SqliteEnsembleSession {
    async fn transaction(&mut self) -> Result<&mut Transaction<'static, Sqlite>, RepositoryError> {
        if self.tx.is_none() {
            let tx = self.pool.writer.begin().await.map_err(query_err)?;
            self.tx = Some(tx);
        }
        self.tx.as_mut().ok_or(RepositoryError::Connection)
    }
}

impl EnsembleSession for SqliteEnsembleSession {
    async fn list_actionable_ensembles(&mut self) -> Result<Vec<Ensemble>, RepositoryError> {
        let sql = format!(
            "SELECT e.* FROM ensemble e
             WHERE EXISTS (
                 SELECT 1 FROM ensemble_workflow w
                 WHERE w.ensemble_id = e.id AND w.state IN ({})
             )
             ORDER BY e.id ASC",
            actionable_states_sql()
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        rows_to_ensembles(&rows)
    }

    async fn list_workflows(
        &mut self,
        ensemble_id: i64,
    ) -> Result<Vec<EnsembleWorkflow>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM ensemble_workflow WHERE ensemble_id = ? ORDER BY id ASC")
            .bind(ensemble_id)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        rows_to_workflows(&rows)
    }

    async fn update_workflow(
        &mut self,
        workflow: &EnsembleWorkflow,
        from: WorkflowState,
    ) -> Result<(), RepositoryError> {
        let tx = self.transaction().await?;
        write_workflow_state(&mut **tx, workflow, from).await
    }

    async fn commit(&mut self) -> Result<(), RepositoryError> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await.map_err(query_err)?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), RepositoryError> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await.map_err(query_err)?;
        }
        Ok(())
    }
}
