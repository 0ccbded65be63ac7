//! Artifact downloads.
//!
//! [`HttpClient::stream_to_file`] moves bytes; [`DownloadClient`] decides which
//! transfer formats of a finished job to fetch, where they land, and turns
//! every failure into a [`DownloadResult`] record.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{DidimoApi, HttpClient, ProgressSink};
use crate::error::{DownloadError, ErrorCode, StatusError};
use crate::types::{ArtifactResult, DownloadResult, Event, JobId, JobKind, JobSnapshot, TransferFormat};

impl HttpClient {
    /// Stream `url` into `dest`. A partially written file is removed on failure.
    pub(crate) async fn stream_to_file(
        &self,
        url: &str,
        dest: &Path,
        progress: &ProgressSink,
    ) -> Result<u64, DownloadError> {
        let response = self
            .authorized(self.http.get(url))
            .send()
            .await
            .map_err(|e| DownloadError::Transport {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(DownloadError::Http {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let result = write_body(response, url, dest, progress).await;
        if result.is_err() {
            // no partial packages on disk
            tokio::fs::remove_file(dest).await.ok();
        }
        result
    }
}

async fn write_body(
    mut response: reqwest::Response,
    url: &str,
    dest: &Path,
    progress: &ProgressSink,
) -> Result<u64, DownloadError> {
    let io_error = |e: std::io::Error| DownloadError::Io {
        path: dest.to_path_buf(),
        reason: e.to_string(),
    };

    let total = response.content_length();
    let mut file = tokio::fs::File::create(dest).await.map_err(io_error)?;
    let mut written = 0u64;

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| DownloadError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        })?
    {
        file.write_all(&chunk).await.map_err(io_error)?;
        written += chunk.len() as u64;
        progress.advance(written, total);
    }

    file.flush().await.map_err(io_error)?;
    debug!(url, ?dest, bytes = written, "artifact written");
    Ok(written)
}

/// Local file a transfer format of `job_id` is written to.
///
/// Both parts come from outside (user input or server response) and must be
/// plain names, so the result always sits directly inside `output_dir`.
pub fn output_file(output_dir: &Path, job_id: &JobId, format_name: &str) -> Result<PathBuf, DownloadError> {
    let job_id = plain_name(job_id.as_str())?;
    let format_name = plain_name(format_name)?;
    Ok(output_dir.join(format!("{}_{}.zip", job_id, format_name)))
}

/// Accept `name` only if it cannot address another directory
pub(crate) fn plain_name(name: &str) -> Result<&str, DownloadError> {
    let unsafe_name = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || Path::new(name).is_absolute();
    if unsafe_name {
        return Err(DownloadError::UnsafeFileName {
            name: name.to_string(),
        });
    }
    Ok(name)
}

/// Fetches the artifacts of finished jobs
#[derive(Clone)]
pub struct DownloadClient {
    api: Arc<dyn DidimoApi>,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl DownloadClient {
    /// Client publishing progress on `event_tx`
    pub fn new(api: Arc<dyn DidimoApi>, event_tx: broadcast::Sender<Event>) -> Self {
        Self {
            api,
            event_tx: Some(event_tx),
        }
    }

    /// Client without progress events
    pub fn silent(api: Arc<dyn DidimoApi>) -> Self {
        Self { api, event_tx: None }
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = &self.event_tx {
            tx.send(event).ok();
        }
    }

    fn sink(&self, job_id: &JobId) -> ProgressSink {
        match &self.event_tx {
            Some(tx) => ProgressSink::new(job_id.clone(), tx.clone()),
            None => ProgressSink::disabled(job_id.clone()),
        }
    }

    /// Download every transfer format of `snapshot` matching `package_types`
    /// (all formats when empty) into `output_dir`.
    ///
    /// Never fails: problems are recorded in the returned result.
    pub async fn download_job(
        &self,
        index: usize,
        snapshot: &JobSnapshot,
        package_types: &[String],
        output_dir: &Path,
    ) -> DownloadResult {
        let job_id = snapshot.id.clone();
        let formats = select_formats(&snapshot.transfer_formats, package_types);

        if formats.is_empty() {
            let err = DownloadError::NoMatchingFormat {
                job_id: job_id.to_string(),
                package_type: (!package_types.is_empty()).then(|| package_types.join(",")),
            };
            warn!(index, job_id = %job_id, "{}", err);
            self.emit(Event::DownloadFailed {
                job_id: job_id.clone(),
                error: err.to_string(),
            });
            return failed_result(index, job_id, &err, Vec::new());
        }

        let targets = match formats
            .into_iter()
            .map(|f| output_file(output_dir, &job_id, &f.name).map(|dest| (f, dest)))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(targets) => targets,
            Err(err) => {
                warn!(index, job_id = %job_id, "{}", err);
                self.emit(Event::DownloadFailed {
                    job_id: job_id.clone(),
                    error: err.to_string(),
                });
                return failed_result(index, job_id, &err, Vec::new());
            }
        };
        self.download_formats(index, &job_id, targets).await
    }

    /// Fetch each `(format, destination)` pair in order, recording every
    /// outcome. The first failure decides the result's error code.
    pub async fn download_formats(
        &self,
        index: usize,
        job_id: &JobId,
        targets: Vec<(&TransferFormat, PathBuf)>,
    ) -> DownloadResult {
        let sink = self.sink(job_id);
        let mut artifacts = Vec::with_capacity(targets.len());
        let mut first_error: Option<DownloadError> = None;

        for (format, dest) in targets {
            let fetched = match ensure_parent(&dest).await {
                Ok(()) => self.api.fetch_artifact(format.url(), &dest, &sink).await,
                Err(e) => Err(e),
            };

            match fetched {
                Ok(bytes) => {
                    info!(job_id = %job_id, format = %format.name, path = ?dest, bytes, "downloaded");
                    self.emit(Event::DownloadComplete {
                        job_id: job_id.clone(),
                        path: dest.clone(),
                    });
                    artifacts.push(ArtifactResult {
                        format: format.name.clone(),
                        url: format.url().to_string(),
                        output_file: dest,
                        bytes: Some(bytes),
                        error_message: None,
                    });
                }
                Err(e) => {
                    warn!(job_id = %job_id, format = %format.name, error = %e, "download failed");
                    self.emit(Event::DownloadFailed {
                        job_id: job_id.clone(),
                        error: e.to_string(),
                    });
                    artifacts.push(ArtifactResult {
                        format: format.name.clone(),
                        url: format.url().to_string(),
                        output_file: dest,
                        bytes: None,
                        error_message: Some(e.to_string()),
                    });
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(err) => failed_result(index, job_id.clone(), &err, artifacts),
            None => DownloadResult {
                index,
                job_id: job_id.clone(),
                download_error: false,
                code: None,
                error_message: None,
                artifacts,
            },
        }
    }

    /// Look up `job_id` and download its artifacts.
    ///
    /// An unknown id comes back as [`StatusError::NotFound`] so callers can
    /// exit cleanly.
    pub async fn download_by_id(
        &self,
        job_id: &JobId,
        package_types: &[String],
        output_dir: &Path,
    ) -> Result<DownloadResult, StatusError> {
        let snapshot = self.api.job_status(JobKind::Didimo, job_id).await?;
        Ok(self.download_job(0, &snapshot, package_types, output_dir).await)
    }
}

async fn ensure_parent(dest: &Path) -> Result<(), DownloadError> {
    match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::Io {
                path: parent.to_path_buf(),
                reason: e.to_string(),
            }),
        _ => Ok(()),
    }
}

fn select_formats<'a>(formats: &'a [TransferFormat], package_types: &[String]) -> Vec<&'a TransferFormat> {
    formats
        .iter()
        .filter(|f| package_types.is_empty() || package_types.iter().any(|p| p == &f.name))
        .collect()
}

fn failed_result(
    index: usize,
    job_id: JobId,
    err: &DownloadError,
    artifacts: Vec<ArtifactResult>,
) -> DownloadResult {
    DownloadResult {
        index,
        job_id,
        download_error: true,
        code: Some(err.error_code().to_string()),
        error_message: Some(err.to_string()),
        artifacts,
    }
}
