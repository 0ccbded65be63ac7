//! Sequential upload phase.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::{BatchOrchestrator, BatchRequest};
use crate::client::{FilePart, UploadRequest};
use crate::error::{ErrorCode, UploadError};
use crate::types::{Event, InputType, JobId, JobKind, UploadFailure};

/// Multipart field the primary file is sent under
fn primary_field(input_type: InputType) -> &'static str {
    match input_type {
        InputType::Photo | InputType::Rgbd => "photo",
        InputType::LofimeshTexture | InputType::HifimeshTexturePhoto => "archive",
    }
}

/// Build the creation request for one input file
pub(super) fn creation_request(file: &Path, request: &BatchRequest) -> UploadRequest {
    let mut upload = UploadRequest::new(
        JobKind::Didimo,
        FilePart::new(primary_field(request.input_type), file),
    )
    .field("input_type", request.input_type.as_str());

    for feature in &request.features {
        upload = upload.field(feature.clone(), "true");
    }
    for package in &request.package_types {
        upload = upload.field("transfer_formats", package.clone());
    }
    if let Some(depth) = &request.depth {
        upload = upload.secondary(FilePart::new("depth", depth));
    }
    upload
}

fn failure_record(index: usize, file: &Path, err: &UploadError) -> UploadFailure {
    let (status_code, message, body) = match err {
        UploadError::Rejected {
            status,
            body,
            message,
        } => (
            Some(*status),
            message.clone().unwrap_or_else(|| err.to_string()),
            Some(body.clone()),
        ),
        other => (None, other.to_string(), None),
    };

    UploadFailure {
        index,
        input_file: file.to_path_buf(),
        code: err.error_code().to_string(),
        status_code,
        message,
        body,
    }
}

impl BatchOrchestrator {
    /// Upload every file in order, one request at a time.
    ///
    /// Returns the job id per item (`None` where the upload failed) and the
    /// failure records.
    pub(super) async fn upload_all(
        &self,
        files: &[PathBuf],
        request: &BatchRequest,
    ) -> (Vec<Option<JobId>>, Vec<UploadFailure>) {
        let total = files.len();
        let mut job_ids = Vec::with_capacity(total);
        let mut failures = Vec::new();

        for (index, file) in files.iter().enumerate() {
            self.emit_event(Event::Uploading {
                index,
                total,
                path: file.clone(),
            });

            match self.api.create_job(&creation_request(file, request)).await {
                Ok(created) => {
                    info!(index, file = ?file, job_id = %created.id, "uploaded");
                    self.emit_event(Event::Uploaded {
                        index,
                        job_id: created.id.clone(),
                    });
                    job_ids.push(Some(created.id));
                }
                Err(e) => {
                    warn!(index, file = ?file, error = %e, "upload failed");
                    self.emit_event(Event::UploadFailed {
                        index,
                        path: file.clone(),
                        error: e.to_string(),
                    });
                    failures.push(failure_record(index, file, &e));
                    job_ids.push(None);
                }
            }
        }

        (job_ids, failures)
    }
}
