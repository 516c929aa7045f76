//! Read-only access to the run-time monitoring database.

use chrono::{DateTime, Utc};
use ensemble_types::error::RepositoryError;
use ensemble_types::monitoring::MonitorRecord;
use uuid::Uuid;

/// Source of workflow state records written by the monitoring daemon.
pub trait MonitoringSource: Send + Sync {
    /// The most recent record for `wf_uuid` whose timestamp is at or after
    /// `since`, or `None` if nothing has been recorded since then.
    fn latest_state_since(
        &self,
        wf_uuid: &Uuid,
        since: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Option<MonitorRecord>, RepositoryError>> + Send;
}
