//! Job status lookup.

use serde::Serialize;
use tracing::debug;

use super::{DidimoApi, HttpClient};
use crate::error::StatusError;
use crate::types::{JobId, JobKind, JobSnapshot, JobStatus};

impl HttpClient {
    /// GET the status of one job; 404 becomes [`StatusError::NotFound`]
    pub(crate) async fn status(&self, kind: JobKind, id: &JobId) -> Result<JobSnapshot, StatusError> {
        let url = self
            .config
            .endpoint(&format!("{}/{}", kind.collection_path(), urlencoding::encode(id.as_str())));

        let response = self
            .authorized(self.http.get(&url))
            .send()
            .await
            .map_err(|e| StatusError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StatusError::NotFound { id: id.to_string() });
        }

        let body = response
            .text()
            .await
            .map_err(|e| StatusError::Transport(format!("failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(StatusError::Http {
                id: id.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let mut snapshot: JobSnapshot =
            serde_json::from_str(&body).map_err(|e| StatusError::Decode(e.to_string()))?;
        if snapshot.id.as_str().is_empty() {
            snapshot.id = id.clone();
        }
        debug!(job_id = %id, status = ?snapshot.status, percent = snapshot.percent, "status");
        Ok(snapshot)
    }
}

/// Result of looking up one id in a multi-id status query
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "lookup", rename_all = "snake_case")]
pub enum StatusLookup {
    /// The job exists
    Found(JobSnapshot),
    /// The service does not know the id
    NotFound {
        /// The id that was looked up
        key: JobId,
    },
}

/// Look up several jobs in order.
///
/// Unknown ids are reported inline; any other failure aborts the query.
pub async fn status_many(
    api: &dyn DidimoApi,
    ids: &[JobId],
) -> Result<Vec<StatusLookup>, StatusError> {
    let mut lookups = Vec::with_capacity(ids.len());
    for id in ids {
        match api.job_status(JobKind::Didimo, id).await {
            Ok(snapshot) => lookups.push(StatusLookup::Found(snapshot)),
            Err(StatusError::NotFound { .. }) => {
                lookups.push(StatusLookup::NotFound { key: id.clone() })
            }
            Err(e) => return Err(e),
        }
    }
    Ok(lookups)
}

/// Exit code for a silent status query.
///
/// Walks the lookups in order: the first job in error (or unknown) yields 1,
/// the first job still pending or processing yields 2, otherwise 0.
pub fn silent_exit_code(lookups: &[StatusLookup]) -> i32 {
    for lookup in lookups {
        match lookup {
            StatusLookup::NotFound { .. } => return 1,
            StatusLookup::Found(snapshot) => {
                if snapshot.status == JobStatus::Error || !snapshot.status_message.is_empty() {
                    return 1;
                }
                if matches!(snapshot.status, JobStatus::Pending | JobStatus::Processing) {
                    return 2;
                }
            }
        }
    }
    0
}
