//! Bounded pool of background download workers.
//!
//! Admission is a semaphore: a permit is acquired before a worker is spawned
//! and held until the worker has pushed its result, so no more than
//! `max_concurrent_downloads` workers are ever outstanding. Results flow back
//! through a [`ResultQueue`] and are drained once every worker has been joined.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::client::DownloadClient;
use crate::result_queue::ResultQueue;
use crate::types::{DownloadResult, Event, JobId, JobSnapshot};

/// Error code recorded for a worker that ended without reporting
pub const WORKER_LOST: &str = "download_worker_lost";

/// Counters describing worker admission
#[derive(Debug, Default)]
pub struct AdmissionGauge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    launched: AtomicUsize,
}

impl AdmissionGauge {
    fn enter(&self) -> usize {
        self.launched.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        now
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Workers currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Most workers ever running at once
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Workers spawned so far
    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }
}

/// Leaves the in-flight count even if the worker panics
struct InFlight(Arc<AdmissionGauge>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.exit();
    }
}

pub(super) struct DownloadPool {
    limit: Arc<Semaphore>,
    workers: JoinSet<()>,
    results: ResultQueue<DownloadResult>,
    downloads: DownloadClient,
    gauge: Arc<AdmissionGauge>,
    event_tx: broadcast::Sender<Event>,
    package_types: Arc<[String]>,
    output_dir: PathBuf,
    launched: Vec<(usize, JobId)>,
}

impl DownloadPool {
    pub(super) fn new(
        max_workers: usize,
        capacity: usize,
        downloads: DownloadClient,
        gauge: Arc<AdmissionGauge>,
        event_tx: broadcast::Sender<Event>,
        package_types: &[String],
        output_dir: PathBuf,
    ) -> Self {
        Self {
            limit: Arc::new(Semaphore::new(max_workers.max(1))),
            workers: JoinSet::new(),
            results: ResultQueue::new(capacity),
            downloads,
            gauge,
            event_tx,
            package_types: package_types.into(),
            output_dir,
            launched: Vec::new(),
        }
    }

    /// Wait for a free slot, then start a worker downloading `snapshot`
    pub(super) async fn submit(&mut self, index: usize, snapshot: JobSnapshot) {
        // recorded first so `finish` accounts for the item whatever happens below
        self.launched.push((index, snapshot.id.clone()));
        let Ok(permit) = self.limit.clone().acquire_owned().await else {
            return;
        };

        let in_flight = self.gauge.enter();
        debug!(
            index,
            job_id = %snapshot.id,
            in_flight,
            queued_results = self.results.approximate_size(),
            "admitted download worker"
        );
        self.event_tx
            .send(Event::DownloadQueued {
                job_id: snapshot.id.clone(),
                in_flight,
            })
            .ok();

        let guard = InFlight(self.gauge.clone());
        let producer = self.results.producer();
        let downloads = self.downloads.clone();
        let package_types = self.package_types.clone();
        let output_dir = self.output_dir.clone();

        self.workers.spawn(async move {
            let _permit = permit;
            let _guard = guard;
            let result = downloads
                .download_job(index, &snapshot, &package_types, &output_dir)
                .await;
            if producer.put(result).await.is_err() {
                warn!(index, "result queue closed before worker finished");
            }
        });
    }

    /// Join every worker and drain the results, sorted by item index.
    ///
    /// A worker that ended without reporting gets a synthesized failure so
    /// every launched item is accounted for.
    pub(super) async fn finish(mut self) -> Vec<DownloadResult> {
        if !self.workers.is_empty() {
            debug!(outstanding = self.workers.len(), "waiting for download workers");
        }
        while let Some(joined) = self.workers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "download worker ended abnormally");
            }
        }

        let mut results = self.results.drain_to_list();
        for (index, job_id) in &self.launched {
            if !results.iter().any(|r| r.index == *index) {
                results.push(DownloadResult {
                    index: *index,
                    job_id: job_id.clone(),
                    download_error: true,
                    code: Some(WORKER_LOST.to_string()),
                    error_message: Some("download worker ended without reporting a result".to_string()),
                    artifacts: Vec::new(),
                });
            }
        }

        results.sort_by_key(|r| r.index);
        results
    }
}
