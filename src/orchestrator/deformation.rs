//! Asset deformation: create, wait with an optional timeout, download.
//!
//! This is the one flow with a wall-clock limit. The wait runs in its own
//! task owned by the waiting future; when the limit passes the task is
//! aborted and the outcome is [`DeformationOutcome::TimedOut`], kept apart
//! from `Done` and `Failed`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::polling::poll_until_terminal;
use crate::client::download::plain_name;
use crate::client::{DidimoApi, DownloadClient, FilePart, UploadRequest};
use crate::config::Config;
use crate::error::{DownloadError, ErrorCode, ProcessingError, Result};
use crate::types::{CreatedJob, DownloadResult, Event, JobId, JobKind};

/// Parameters of one deformation
#[derive(Clone, Debug)]
pub struct DeformationRequest {
    /// Didimo the template is applied to
    pub didimo_key: JobId,
    /// Deformation template file
    pub template: PathBuf,
    /// Appended to the asset key to name the output package
    pub output_suffix: String,
    /// Give up waiting after this long
    pub timeout: Option<Duration>,
}

/// How waiting for an asset ended
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeformationOutcome {
    /// The asset is ready
    Done,
    /// The asset failed, or its status could not be read
    Failed {
        /// Server status message or lookup error
        message: String,
    },
    /// The timeout elapsed first
    TimedOut {
        /// The limit that elapsed, in seconds
        after_secs: u64,
    },
}

impl DeformationOutcome {
    /// Process exit code: 0 done, 1 failed, 3 timed out
    pub fn exit_code(&self) -> i32 {
        match self {
            DeformationOutcome::Done => 0,
            DeformationOutcome::Failed { .. } => 1,
            DeformationOutcome::TimedOut { .. } => 3,
        }
    }
}

/// Result of [`DeformationRunner::run`]
#[derive(Clone, Debug, Serialize)]
pub struct DeformationReport {
    /// Key of the created asset
    pub asset_key: JobId,
    /// How the wait ended
    pub outcome: DeformationOutcome,
    /// Download of the package, only attempted when the asset is done
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download: Option<DownloadResult>,
}

impl DeformationReport {
    /// Process exit code for the whole deformation
    pub fn exit_code(&self) -> i32 {
        match (&self.outcome, &self.download) {
            (DeformationOutcome::Done, Some(download)) if !download.succeeded() => 1,
            (outcome, _) => outcome.exit_code(),
        }
    }
}

/// Drives deformation requests against the asset endpoints
pub struct DeformationRunner {
    api: Arc<dyn DidimoApi>,
    config: Arc<Config>,
    event_tx: broadcast::Sender<Event>,
}

impl DeformationRunner {
    /// Runner sharing an event channel with its caller
    pub fn new(api: Arc<dyn DidimoApi>, config: Arc<Config>, event_tx: broadcast::Sender<Event>) -> Self {
        Self {
            api,
            config,
            event_tx,
        }
    }

    /// Wait for asset `key` to finish, polling every `asset_interval`.
    ///
    /// The poll task lives in a local [`JoinSet`], so it stops when the limit
    /// passes and also when this future is dropped before finishing.
    pub async fn wait(&self, key: &JobId, timeout: Option<Duration>) -> DeformationOutcome {
        let api = self.api.clone();
        let event_tx = self.event_tx.clone();
        let interval = self.config.polling.asset_interval;
        let asset = key.clone();

        let mut poller = JoinSet::new();
        poller.spawn(async move {
            poll_until_terminal(api.as_ref(), JobKind::Asset, &asset, interval, None, &event_tx).await
        });

        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, poller.join_next()).await {
                Ok(joined) => joined,
                Err(_) => {
                    poller.abort_all();
                    warn!(asset_key = %key, timeout_secs = limit.as_secs(), "timed out waiting for asset");
                    return DeformationOutcome::TimedOut {
                        after_secs: limit.as_secs(),
                    };
                }
            },
            None => poller.join_next().await,
        };

        match joined {
            Some(Ok(Ok(_))) => DeformationOutcome::Done,
            Some(Ok(Err(e))) => DeformationOutcome::Failed {
                message: match e {
                    ProcessingError::Failed { message, .. } => message,
                    other => other.to_string(),
                },
            },
            Some(Err(e)) => DeformationOutcome::Failed {
                message: format!("status task failed: {}", e),
            },
            None => DeformationOutcome::Failed {
                message: "status task was not started".to_string(),
            },
        }
    }

    /// Create the asset, wait for it, and download its first transfer format
    /// to `<output_dir>/<key><suffix>.zip`.
    ///
    /// A rejected creation request is fatal; everything after it is reported.
    pub async fn run(&self, request: &DeformationRequest) -> Result<DeformationReport> {
        let upload = UploadRequest::new(
            JobKind::Asset,
            FilePart::new("template_deformation", &request.template),
        )
        .field("didimo_key", request.didimo_key.as_str());

        let created = self.api.create_job(&upload).await?;
        info!(asset_key = %created.id, didimo_key = %request.didimo_key, "deformation requested");

        let outcome = self.wait(&created.id, request.timeout).await;
        let download = match outcome {
            DeformationOutcome::Done => Some(self.download(&created, &request.output_suffix).await),
            _ => None,
        };

        Ok(DeformationReport {
            asset_key: created.id,
            outcome,
            download,
        })
    }

    async fn download(&self, created: &CreatedJob, suffix: &str) -> DownloadResult {
        let downloads = DownloadClient::new(self.api.clone(), self.event_tx.clone());

        let Some(format) = created.transfer_formats.first() else {
            let err = DownloadError::NoMatchingFormat {
                job_id: created.id.to_string(),
                package_type: None,
            };
            warn!(asset_key = %created.id, "{}", err);
            return unsaved(created, &err);
        };

        let name = plain_name(created.id.as_str())
            .and_then(|key| plain_name(suffix).map(|suffix| format!("{}{}.zip", key, suffix)));
        let dest = match name {
            Ok(name) => self.config.download.output_dir.join(name),
            Err(err) => {
                warn!(asset_key = %created.id, "{}", err);
                return unsaved(created, &err);
            }
        };
        downloads
            .download_formats(0, &created.id, vec![(format, dest)])
            .await
    }
}

/// Failed download of `created` that never reached the network
fn unsaved(created: &CreatedJob, err: &DownloadError) -> DownloadResult {
    DownloadResult {
        index: 0,
        job_id: created.id.clone(),
        download_error: true,
        code: Some(err.error_code().to_string()),
        error_message: Some(err.to_string()),
        artifacts: Vec::new(),
    }
}
