//! Core types for didimo-cli

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Opaque job identifier assigned by the service at creation
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Create a new JobId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remote job status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted, not started
    Pending,
    /// Being processed
    Processing,
    /// Finished successfully
    Done,
    /// Finished with an error
    Error,
    /// Any status this client does not know about
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    /// Whether no further transitions are expected
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }
}

/// Which status endpoint a job lives under
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobKind {
    /// Avatar generation (`/v3/didimos`)
    Didimo,
    /// Asset deformation (`/v3/assets`)
    Asset,
}

impl JobKind {
    /// Collection path for this kind of job
    pub fn collection_path(&self) -> &'static str {
        match self {
            JobKind::Didimo => "/v3/didimos",
            JobKind::Asset => "/v3/assets",
        }
    }
}

/// Download reference of a transfer format
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Links {
    /// Retrievable URL of the artifact
    #[serde(rename = "self")]
    pub self_url: String,
}

/// A named output artifact attached to a completed job
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFormat {
    /// Format name, e.g. `maya` or `gltf`
    pub name: String,
    /// Download reference
    #[serde(rename = "__links")]
    pub links: Links,
}

impl TransferFormat {
    /// Artifact URL
    pub fn url(&self) -> &str {
        &self.links.self_url
    }
}

/// Last observed state of a remote job
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Job identifier
    #[serde(rename = "key", default)]
    pub id: JobId,

    /// Remote status
    pub status: JobStatus,

    /// Completion percent; absent from the response means 100
    #[serde(default = "default_percent")]
    pub percent: u32,

    /// Empty while healthy; non-empty signals terminal failure
    #[serde(default)]
    pub status_message: String,

    /// Output artifacts, populated once done
    #[serde(default)]
    pub transfer_formats: Vec<TransferFormat>,
}

fn default_percent() -> u32 {
    100
}

/// How a poll loop should treat a snapshot
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TerminalState {
    /// Finished; artifacts may be downloaded
    Done,
    /// Failed with the server-provided message
    Failed(String),
}

impl JobSnapshot {
    /// Classify the snapshot, or `None` while the job is still running.
    ///
    /// A non-empty status message is checked first and wins regardless of
    /// `status`.
    pub fn terminal_state(&self) -> Option<TerminalState> {
        if !self.status_message.is_empty() {
            return Some(TerminalState::Failed(self.status_message.clone()));
        }
        if self.status == JobStatus::Done {
            return Some(TerminalState::Done);
        }
        None
    }
}

/// Response to a successful job creation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedJob {
    /// Identifier assigned by the service
    #[serde(rename = "key")]
    pub id: JobId,
    /// Transfer formats announced at creation (deformation requests carry them)
    #[serde(default)]
    pub transfer_formats: Vec<TransferFormat>,
}

/// Type of input a didimo is generated from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    /// A single photo (.jpg/.jpeg/.png)
    Photo,
    /// A photo with a depth map
    Rgbd,
    /// Low fidelity mesh with texture (.zip)
    LofimeshTexture,
    /// High fidelity scan with texture and photo (.zip)
    HifimeshTexturePhoto,
}

impl InputType {
    /// Wire name of the input type
    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::Photo => "photo",
            InputType::Rgbd => "rgbd",
            InputType::LofimeshTexture => "lofimesh_texture",
            InputType::HifimeshTexturePhoto => "hifimesh_texture_photo",
        }
    }
}

impl std::fmt::Display for InputType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InputType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "photo" => Ok(InputType::Photo),
            "rgbd" => Ok(InputType::Rgbd),
            "lofimesh_texture" => Ok(InputType::LofimeshTexture),
            "hifimesh_texture_photo" => Ok(InputType::HifimeshTexturePhoto),
            other => Err(format!("unknown input type '{}'", other)),
        }
    }
}

/// Upload failure for one batch item
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadFailure {
    /// Position of the item in the batch
    pub index: usize,
    /// Local file that was uploaded
    pub input_file: PathBuf,
    /// Machine-readable error code
    pub code: String,
    /// HTTP status, when the service answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Server `description` or local error text
    pub message: String,
    /// Raw response body, when the service answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Processing failure for one batch item
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingFailure {
    /// Position of the item in the batch
    pub index: usize,
    /// Job that failed
    pub job_id: JobId,
    /// Machine-readable error code
    pub code: String,
    /// Last observed percent, when a status was observed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<u32>,
    /// Server status message or lookup failure text
    pub message: String,
}

/// Outcome of fetching one artifact
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactResult {
    /// Transfer format name
    pub format: String,
    /// Source URL
    pub url: String,
    /// Local output file
    pub output_file: PathBuf,
    /// Bytes written on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    /// Error text on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ArtifactResult {
    /// Whether the artifact was written
    pub fn succeeded(&self) -> bool {
        self.error_message.is_none()
    }
}

/// Outcome of downloading the artifacts of one completed job
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadResult {
    /// Position of the originating item in the batch
    pub index: usize,
    /// Downloaded job
    pub job_id: JobId,
    /// True when any part of the download failed
    pub download_error: bool,
    /// Machine-readable error code on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Error text on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Per-artifact outcomes
    pub artifacts: Vec<ArtifactResult>,
}

impl DownloadResult {
    /// Whether every artifact was written
    pub fn succeeded(&self) -> bool {
        !self.download_error
    }
}

/// Events emitted while a batch runs
///
/// Consumers subscribe through [`crate::BatchOrchestrator::subscribe`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// An upload is about to start
    Uploading {
        /// Item position
        index: usize,
        /// Number of items in the batch
        total: usize,
        /// Local file
        path: PathBuf,
    },

    /// The service accepted an upload
    Uploaded {
        /// Item position
        index: usize,
        /// Assigned job id
        job_id: JobId,
    },

    /// An upload failed
    UploadFailed {
        /// Item position
        index: usize,
        /// Local file
        path: PathBuf,
        /// Error text
        error: String,
    },

    /// Polling observed progress
    Progress {
        /// Job being polled
        job_id: JobId,
        /// Latest percent
        percent: u32,
        /// Non-negative increase since the previous reading
        delta: u32,
    },

    /// A job finished successfully
    JobDone {
        /// Finished job
        job_id: JobId,
    },

    /// A job finished with an error or polling gave up
    JobFailed {
        /// Failed job
        job_id: JobId,
        /// Error text
        error: String,
    },

    /// A background download worker was admitted
    DownloadQueued {
        /// Job to download
        job_id: JobId,
        /// Workers running after admission
        in_flight: usize,
    },

    /// Bytes were written for an artifact
    Downloading {
        /// Job being downloaded
        job_id: JobId,
        /// Bytes written so far
        bytes: u64,
        /// Expected size from `content-length`
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
    },

    /// An artifact was written
    DownloadComplete {
        /// Downloaded job
        job_id: JobId,
        /// Output file
        path: PathBuf,
    },

    /// A download failed
    DownloadFailed {
        /// Job being downloaded
        job_id: JobId,
        /// Error text
        error: String,
    },
}
