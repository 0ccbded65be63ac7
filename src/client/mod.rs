//! Remote service clients.
//!
//! [`DidimoApi`] is the seam between orchestration and the network. The
//! production implementation is [`HttpClient`], whose methods are split by
//! concern:
//! - [`upload`] - multipart job creation (UploadClient)
//! - [`status`] - job status lookup and multi-id status queries (JobStatusClient)
//! - [`download`] - artifact streaming and transfer-format selection (DownloadClient)
//!
//! [`account`] adds the `/v2` account, listing and on-demand feature calls,
//! which the orchestrator never needs and so stay off the trait.

pub mod account;
pub mod download;
pub mod status;
pub mod upload;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use account::{AccountProfile, AccountSummary, DidimoList, ExecutedJob, ListedDidimo};
pub use download::DownloadClient;
pub use status::{StatusLookup, silent_exit_code, status_many};
pub use upload::{FilePart, UploadRequest};

use crate::config::Config;
use crate::error::{DownloadError, Result, StatusError, UploadError};
use crate::types::{CreatedJob, Event, JobId, JobKind, JobSnapshot};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Header carrying the access key
pub const API_KEY_HEADER: &str = "DIDIMO-API-KEY";

/// Operations the orchestrator needs from the remote service
#[async_trait::async_trait]
pub trait DidimoApi: Send + Sync {
    /// Submit one file (plus optional secondary file) to a creation endpoint
    async fn create_job(&self, request: &UploadRequest) -> std::result::Result<CreatedJob, UploadError>;

    /// Fetch the current state of a job
    async fn job_status(
        &self,
        kind: JobKind,
        id: &JobId,
    ) -> std::result::Result<JobSnapshot, StatusError>;

    /// Stream an artifact into `dest`, returning the number of bytes written
    async fn fetch_artifact(
        &self,
        url: &str,
        dest: &Path,
        progress: &ProgressSink,
    ) -> std::result::Result<u64, DownloadError>;
}

/// Publishes download progress for one job onto the event channel
#[derive(Clone)]
pub struct ProgressSink {
    job_id: JobId,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl ProgressSink {
    /// Sink publishing on `event_tx`
    pub fn new(job_id: JobId, event_tx: broadcast::Sender<Event>) -> Self {
        Self {
            job_id,
            event_tx: Some(event_tx),
        }
    }

    /// Sink that drops every update
    pub fn disabled(job_id: JobId) -> Self {
        Self {
            job_id,
            event_tx: None,
        }
    }

    /// Job the sink reports for
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Report cumulative bytes written
    pub fn advance(&self, bytes: u64, total: Option<u64>) {
        if let Some(tx) = &self.event_tx {
            tx.send(Event::Downloading {
                job_id: self.job_id.clone(),
                bytes,
                total,
            })
            .ok();
        }
    }
}

/// reqwest-backed [`DidimoApi`]
#[derive(Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    config: Arc<Config>,
}

impl HttpClient {
    /// Build a client from an explicit configuration
    pub fn new(config: Arc<Config>) -> Result<Self> {
        config.validate()?;

        let mut builder = reqwest::Client::builder().user_agent(config.http.user_agent.clone());
        if let Some(timeout) = config.http.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;

        Ok(Self { http, config })
    }

    /// Attach authentication headers
    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.header(API_KEY_HEADER, &self.config.access_key)
    }
}

#[async_trait::async_trait]
impl DidimoApi for HttpClient {
    async fn create_job(&self, request: &UploadRequest) -> std::result::Result<CreatedJob, UploadError> {
        self.upload(request).await
    }

    async fn job_status(
        &self,
        kind: JobKind,
        id: &JobId,
    ) -> std::result::Result<JobSnapshot, StatusError> {
        self.status(kind, id).await
    }

    async fn fetch_artifact(
        &self,
        url: &str,
        dest: &Path,
        progress: &ProgressSink,
    ) -> std::result::Result<u64, DownloadError> {
        self.stream_to_file(url, dest, progress).await
    }
}
