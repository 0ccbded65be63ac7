//! Aggregate batch results.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{DownloadResult, JobId, ProcessingFailure, UploadFailure};

/// What the batch as a whole amounted to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchOutcome {
    /// No input files were resolved
    NothingAttempted,
    /// Every item finished its last attempted stage successfully
    AllSucceeded,
    /// Some items succeeded, some failed
    Partial {
        /// Items that succeeded
        succeeded: usize,
        /// Items that failed at any stage
        failed: usize,
    },
    /// No item succeeded
    AllFailed,
}

impl BatchOutcome {
    /// Process exit code for this outcome
    pub fn exit_code(&self) -> i32 {
        match self {
            BatchOutcome::NothingAttempted | BatchOutcome::AllSucceeded => 0,
            BatchOutcome::Partial { .. } => 2,
            BatchOutcome::AllFailed => 1,
        }
    }
}

/// Final local state of one batch item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStage {
    /// Upload failed; the item never became a job
    UploadFailed,
    /// Uploaded, not polled (no-wait mode)
    Submitted,
    /// The job failed remotely, or polling it failed
    ProcessingFailed,
    /// The job finished and downloads were skipped
    Processed,
    /// Every requested artifact was written
    Downloaded,
    /// The download was attempted and failed
    DownloadFailed,
}

/// Everything a batch produced
///
/// Results are keyed by item index (position in the resolved input list) and
/// kept sorted by it, whatever order background downloads finished in.
#[derive(Clone, Debug, Serialize)]
pub struct BatchReport {
    /// Number of resolved input files
    pub total_items: usize,
    /// Job id per item, `None` where the upload failed
    pub job_ids: Vec<Option<JobId>>,
    /// Upload failures
    pub upload_errors: Vec<UploadFailure>,
    /// Jobs that did not reach `done`
    pub processing_errors: Vec<ProcessingFailure>,
    /// Whether the polling phase ran
    pub polled: bool,
    /// Download outcomes; `None` when downloads were skipped or never reached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_results: Option<Vec<DownloadResult>>,
    /// When the batch finished
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchReport {
    pub(crate) fn new(total_items: usize) -> Self {
        Self {
            total_items,
            job_ids: Vec::with_capacity(total_items),
            upload_errors: Vec::new(),
            processing_errors: Vec::new(),
            polled: false,
            download_results: None,
            finished_at: None,
        }
    }

    pub(crate) fn finish(mut self) -> Self {
        self.upload_errors.sort_by_key(|e| e.index);
        self.processing_errors.sort_by_key(|e| e.index);
        if let Some(results) = self.download_results.as_mut() {
            results.sort_by_key(|r| r.index);
        }
        self.finished_at = Some(Utc::now());
        self
    }

    /// `(succeeded, failed)` download counts
    pub fn download_tally(&self) -> (usize, usize) {
        self.download_results
            .as_deref()
            .map(|results| {
                let ok = results.iter().filter(|r| r.succeeded()).count();
                (ok, results.len() - ok)
            })
            .unwrap_or((0, 0))
    }

    /// Overall outcome
    pub fn outcome(&self) -> BatchOutcome {
        if self.total_items == 0 {
            return BatchOutcome::NothingAttempted;
        }

        let early_failures = self.upload_errors.len() + self.processing_errors.len();
        let (succeeded, failed) = match &self.download_results {
            Some(_) => {
                let (ok, failed_downloads) = self.download_tally();
                (ok, early_failures + failed_downloads)
            }
            None => (self.total_items.saturating_sub(early_failures), early_failures),
        };

        match (succeeded, failed) {
            (_, 0) => BatchOutcome::AllSucceeded,
            (0, _) => BatchOutcome::AllFailed,
            (succeeded, failed) => BatchOutcome::Partial { succeeded, failed },
        }
    }

    /// Process exit code for the whole batch
    pub fn exit_code(&self) -> i32 {
        self.outcome().exit_code()
    }

    /// Final stage reached by item `index`
    pub fn item_stage(&self, index: usize) -> Option<ItemStage> {
        if index >= self.total_items {
            return None;
        }
        if self.upload_errors.iter().any(|e| e.index == index) {
            return Some(ItemStage::UploadFailed);
        }
        if self.processing_errors.iter().any(|e| e.index == index) {
            return Some(ItemStage::ProcessingFailed);
        }
        match &self.download_results {
            Some(results) => results.iter().find(|r| r.index == index).map(|r| {
                if r.succeeded() {
                    ItemStage::Downloaded
                } else {
                    ItemStage::DownloadFailed
                }
            }),
            None if self.job_ids.get(index).is_some_and(Option::is_some) => Some(if self.polled {
                ItemStage::Processed
            } else {
                ItemStage::Submitted
            }),
            None => None,
        }
    }

    /// One line per failure plus a final tally, for human output
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();

        for e in &self.upload_errors {
            match e.status_code {
                Some(status) => lines.push(format!(
                    "Error {} uploading {}: {}",
                    status,
                    e.input_file.display(),
                    e.message
                )),
                None => lines.push(format!(
                    "Error uploading {}: {}",
                    e.input_file.display(),
                    e.message
                )),
            }
        }
        for e in &self.processing_errors {
            lines.push(format!("Error generating didimo {}: {}", e.job_id, e.message));
        }
        if let Some(results) = &self.download_results {
            for r in results.iter().filter(|r| !r.succeeded()) {
                lines.push(format!(
                    "Error downloading {}: {}",
                    r.job_id,
                    r.error_message.as_deref().unwrap_or("unknown error")
                ));
            }
        }

        if self.total_items == 0 {
            lines.push("No input files to process".to_string());
            return lines;
        }

        lines.push(format!(
            "Upload errors: {} | Processing errors: {}",
            self.upload_errors.len(),
            self.processing_errors.len()
        ));

        if self.download_results.is_some() {
            match self.download_tally() {
                (0, _) => lines.push("All downloads failed!".to_string()),
                (ok, failed) => lines.push(format!(
                    "Process finished - Successful downloads: {} | Download errors: {}",
                    ok, failed
                )),
            }
        }

        lines
    }
}
