//! Read-only view of the monitoring daemon's workflow state table.

use chrono::{DateTime, Utc};
use ensemble_core::repository::monitoring::MonitoringSource;
use ensemble_types::error::RepositoryError;
use ensemble_types::monitoring::{MonitorRecord, MonitorState};
use sqlx::Row;
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

/// Queries `master_workflow` / `master_workflowstate`.
#[derive(Clone)]
pub struct SqliteMonitoringSource {
    pool: SqlitePool,
}

impl SqliteMonitoringSource {
    /// Use an existing pool. Only SELECTs are ever issued through it.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Convert to the unix-seconds representation the monitoring tables use.
pub fn to_unix_seconds(dt: &DateTime<Utc>) -> f64 {
    dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_micros()) / 1_000_000.0
}

fn from_unix_seconds(ts: f64) -> Result<DateTime<Utc>, RepositoryError> {
    let secs = ts.floor();
    let nanos = ((ts - secs) * 1_000_000_000.0).round() as u32;
    DateTime::from_timestamp(secs as i64, nanos.min(999_999_999))
        .ok_or_else(|| RepositoryError::Query(format!("invalid timestamp: {ts}")))
}

impl MonitoringSource for SqliteMonitoringSource {
    async fn latest_state_since(
        &self,
        wf_uuid: &Uuid,
        since: DateTime<Utc>,
    ) -> Result<Option<MonitorRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT s.state, s.status, s.timestamp
             FROM master_workflowstate s
             JOIN master_workflow w ON w.wf_id = s.wf_id
             WHERE w.wf_uuid = ? AND s.timestamp >= ?
             ORDER BY s.timestamp DESC
             LIMIT 1",
        )
        .bind(wf_uuid.to_string())
        .bind(to_unix_seconds(&since))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let state: String = row
            .try_get("state")
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let status: Option<i32> = row
            .try_get("status")
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let timestamp: f64 = row
            .try_get("timestamp")
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let state = match state.parse::<MonitorState>() {
            Ok(state) => state,
            Err(never) => match never {},
        };

        Ok(Some(MonitorRecord {
            wf_uuid: *wf_uuid,
            state,
            status,
            timestamp: from_unix_seconds(timestamp)?,
        }))
    }
}
