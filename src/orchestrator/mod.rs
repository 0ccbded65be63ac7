//! Batch orchestration: upload, poll until terminal, download.
//!
//! The orchestrator is split into focused submodules:
//! - [`upload`] - sequential upload phase and creation requests
//! - [`polling`] - poll-until-terminal loop and progress deltas
//! - [`download_pool`] - semaphore-bounded background download workers
//! - [`report`] - the aggregate [`BatchReport`] and its outcome
//! - [`deformation`] - asset deformation with a wall-clock timeout
//!
//! Per-item failures never abort a batch; they are recorded in the report.

pub mod deformation;
mod download_pool;
mod polling;
pub mod report;
mod upload;


pub use deformation::{DeformationOutcome, DeformationReport, DeformationRequest, DeformationRunner};
pub use download_pool::{AdmissionGauge, WORKER_LOST};
pub use polling::{ProgressTracker, poll_until_terminal};
pub use report::{BatchOutcome, BatchReport, ItemStage};

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::client::{DidimoApi, DownloadClient};
use crate::config::Config;
use crate::input::ResolvedInput;
use crate::types::{Event, InputType};
use download_pool::DownloadPool;

/// Buffer size of the event channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// One `new` invocation
#[derive(Clone, Debug)]
pub struct BatchRequest {
    /// Resolved input: one file, or a batch
    pub input: ResolvedInput,
    /// Input type of every file
    pub input_type: InputType,
    /// Optional features, sent as `<name>=true` fields
    pub features: Vec<String>,
    /// Depth map sent with each upload (rgbd)
    pub depth: Option<PathBuf>,
    /// Transfer formats to request and download (all when empty)
    pub package_types: Vec<String>,
    /// Stop after uploading
    pub no_wait: bool,
    /// Poll, but skip downloads
    pub no_download: bool,
}

impl BatchRequest {
    /// Request with default flags
    pub fn new(input: ResolvedInput, input_type: InputType) -> Self {
        Self {
            input,
            input_type,
            features: Vec::new(),
            depth: None,
            package_types: Vec::new(),
            no_wait: false,
            no_download: false,
        }
    }
}

/// Drives batches of input files through the remote pipeline
pub struct BatchOrchestrator {
    api: Arc<dyn DidimoApi>,
    config: Arc<Config>,
    event_tx: broadcast::Sender<Event>,
    admission: Arc<AdmissionGauge>,
}

impl BatchOrchestrator {
    /// Create an orchestrator over `api` with an explicit configuration
    pub fn new(api: Arc<dyn DidimoApi>, config: Arc<Config>) -> Self {
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            api,
            config,
            event_tx,
            admission: Arc::new(AdmissionGauge::default()),
        }
    }

    /// Subscribe to progress events.
    ///
    /// Subscribers that fall more than the channel capacity behind miss
    /// events; the batch never waits for them.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Download worker admission counters
    pub fn admission(&self) -> &AdmissionGauge {
        &self.admission
    }

    pub(crate) fn emit_event(&self, event: Event) {
        // no receivers is fine
        self.event_tx.send(event).ok();
    }

    /// Run a batch to completion.
    ///
    /// Single-item input downloads inline in this task. Batch input hands each
    /// finished job to the background pool and joins it before reporting.
    pub async fn run(&self, request: BatchRequest) -> BatchReport {
        let files = request.input.files();
        let batch = request.input.is_batch();
        let mut report = BatchReport::new(files.len());

        if files.is_empty() {
            info!("no input files to process");
            return report.finish();
        }

        info!(items = files.len(), batch, "starting upload phase");
        let (job_ids, upload_errors) = self.upload_all(&files, &request).await;
        report.job_ids = job_ids;
        report.upload_errors = upload_errors;

        if report.upload_errors.len() == files.len() {
            warn!(items = files.len(), "every upload failed, skipping polling and downloads");
            return report.finish();
        }
        if request.no_wait {
            return report.finish();
        }

        report.polled = true;
        let output_dir = self.config.download.output_dir.clone();
        let downloads = DownloadClient::new(self.api.clone(), self.event_tx.clone());
        let mut pool = (batch && !request.no_download).then(|| {
            DownloadPool::new(
                self.config.download.max_concurrent_downloads,
                files.len(),
                downloads.clone(),
                self.admission.clone(),
                self.event_tx.clone(),
                &request.package_types,
                output_dir.clone(),
            )
        });
        let mut inline_results = Vec::new();

        let uploaded: Vec<_> = report
            .job_ids
            .iter()
            .enumerate()
            .filter_map(|(index, id)| id.clone().map(|id| (index, id)))
            .collect();

        for (index, job_id) in uploaded {
            let snapshot = match self.poll_item(index, &job_id).await {
                Ok(snapshot) => snapshot,
                Err(failure) => {
                    report.processing_errors.push(failure);
                    continue;
                }
            };

            if request.no_download {
                continue;
            }
            match pool.as_mut() {
                Some(pool) => pool.submit(index, snapshot).await,
                None => inline_results.push(
                    downloads
                        .download_job(index, &snapshot, &request.package_types, &output_dir)
                        .await,
                ),
            }
        }

        if !request.no_download {
            let results = match pool {
                Some(pool) => pool.finish().await,
                None => inline_results,
            };
            report.download_results = Some(results);
        }

        let report = report.finish();
        info!(outcome = ?report.outcome(), "batch finished");
        report
    }
}
