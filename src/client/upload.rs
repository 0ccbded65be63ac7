//! Job creation: one multipart request per input file.

use std::path::{Path, PathBuf};

use reqwest::multipart::{Form, Part};
use tracing::{debug, warn};

use super::HttpClient;
use crate::error::UploadError;
use crate::types::{CreatedJob, JobKind};

/// A file attached to a multipart request under a given field name
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilePart {
    /// Multipart field name (e.g. `photo`, `depth`)
    pub field: String,
    /// Local file
    pub path: PathBuf,
}

impl FilePart {
    /// Attach `path` as `field`
    pub fn new(field: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            field: field.into(),
            path: path.into(),
        }
    }
}

/// Everything needed for one creation request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadRequest {
    /// Which collection to create the job in
    pub kind: JobKind,
    /// Free-form metadata sent as text fields
    pub fields: Vec<(String, String)>,
    /// Primary input file
    pub primary: FilePart,
    /// Optional secondary file, e.g. a depth map
    pub secondary: Option<FilePart>,
}

impl UploadRequest {
    /// Request with no metadata and no secondary file
    pub fn new(kind: JobKind, primary: FilePart) -> Self {
        Self {
            kind,
            fields: Vec::new(),
            primary,
            secondary: None,
        }
    }

    /// Add a metadata field
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// Attach a secondary file
    pub fn secondary(mut self, part: FilePart) -> Self {
        self.secondary = Some(part);
        self
    }
}

/// Guess a MIME type from the file extension
fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

async fn file_part(part: &FilePart) -> Result<Part, UploadError> {
    let bytes = tokio::fs::read(&part.path)
        .await
        .map_err(|e| UploadError::Io {
            path: part.path.clone(),
            reason: e.to_string(),
        })?;
    let file_name = part
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| part.field.clone());

    Part::bytes(bytes)
        .file_name(file_name)
        .mime_str(mime_for(&part.path))
        .map_err(|e| UploadError::Transport(format!("invalid MIME type: {}", e)))
}

/// Pull `description` out of an error body, if it is JSON and has one
fn error_description(body: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()?
        .get("description")?
        .as_str()
        .map(str::to_string)
}

impl HttpClient {
    /// Submit a creation request.
    ///
    /// Success is exactly 200 or 201. Anything else comes back as
    /// [`UploadError::Rejected`] with the status and raw body; no retries.
    pub(crate) async fn upload(&self, request: &UploadRequest) -> Result<CreatedJob, UploadError> {
        let url = self.config.endpoint(request.kind.collection_path());

        let mut form = Form::new();
        for (name, value) in &request.fields {
            form = form.text(name.clone(), value.clone());
        }
        form = form.part(request.primary.field.clone(), file_part(&request.primary).await?);
        if let Some(secondary) = &request.secondary {
            form = form.part(secondary.field.clone(), file_part(secondary).await?);
        }

        debug!(url = %url, input = ?request.primary.path, "uploading");
        let response = self
            .authorized(self.http.post(&url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| UploadError::Transport(format!("failed to read response body: {}", e)))?;

        if status != 200 && status != 201 {
            warn!(status, input = ?request.primary.path, "upload rejected");
            return Err(UploadError::Rejected {
                status,
                message: error_description(&body),
                body,
            });
        }

        serde_json::from_str::<CreatedJob>(&body)
            .map_err(|e| UploadError::Decode(format!("{}: {}", e, body)))
    }
}
