//! Error types for didimo-cli
//!
//! This module provides the error taxonomy for the library:
//! - One closed error enum per component (input resolution, upload, status, download, processing)
//! - A crate-wide [`Error`] wrapping them for fatal paths
//! - Machine-readable error codes and process exit codes via [`ErrorCode`]
//! - A serializable [`ErrorReport`] for the JSON output mode

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for didimo-cli operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for didimo-cli
///
/// Only fatal conditions travel through this type. Per-item failures inside a
/// batch are recorded as data in the batch report instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "api_host")
        key: Option<String>,
    },

    /// Batch input could not be resolved
    #[error("input error: {0}")]
    Input(#[from] InputError),

    /// Upload rejected or failed (single-request flows only)
    #[error("upload error: {0}")]
    Upload(#[from] UploadError),

    /// Job status lookup failed
    #[error("status error: {0}")]
    Status(#[from] StatusError),

    /// Artifact download failed (single-request flows only)
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error while building or using the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Account, listing or execute request failed
    #[error("service error: {0}")]
    Service(#[from] ServiceError),
}

/// Errors raised while turning an input path into a list of files to upload
#[derive(Debug, Error)]
pub enum InputError {
    /// Archive or directory input combined with an input type other than `photo`
    #[error("batch processing is only available for the photo input type (got {input_type})")]
    UnsupportedBatchType {
        /// The input type that was requested
        input_type: String,
    },

    /// The archive could not be opened or extracted
    #[error("extraction failed for {archive}: {reason}")]
    ArchiveExtractionFailed {
        /// The archive that failed to extract
        archive: PathBuf,
        /// The reason extraction failed
        reason: String,
    },

    /// The input is neither a regular file, a directory, nor a supported archive
    #[error("input not supported: {path}")]
    NotSupported {
        /// The offending input path
        path: PathBuf,
    },

    /// The scratch directory could not be prepared or listed
    #[error("failed to read batch directory {path}: {reason}")]
    Listing {
        /// Directory that could not be read
        path: PathBuf,
        /// Underlying I/O failure
        reason: String,
    },
}

/// Errors from the job creation endpoint
#[derive(Debug, Error)]
pub enum UploadError {
    /// The service answered with a status other than 200/201
    #[error("upload rejected with status {status}: {body}")]
    Rejected {
        /// HTTP status code returned by the service
        status: u16,
        /// Raw response body
        body: String,
        /// The `description` field of the error body, when present
        message: Option<String>,
    },

    /// The request never produced a response
    #[error("upload request failed: {0}")]
    Transport(String),

    /// A local input file could not be read
    #[error("failed to read {path}: {reason}")]
    Io {
        /// File that could not be read
        path: PathBuf,
        /// Underlying I/O failure
        reason: String,
    },

    /// A success response did not carry a job key
    #[error("unexpected upload response: {0}")]
    Decode(String),
}

/// Errors from the job status endpoint
#[derive(Debug, Error)]
pub enum StatusError {
    /// The service does not know this job id
    #[error("job {id} not found")]
    NotFound {
        /// The job id that was looked up
        id: String,
    },

    /// Any other non-success status
    #[error("status request for {id} failed with status {status}: {body}")]
    Http {
        /// The job id that was looked up
        id: String,
        /// HTTP status code returned by the service
        status: u16,
        /// Raw response body
        body: String,
    },

    /// The request never produced a response
    #[error("status request failed: {0}")]
    Transport(String),

    /// The response body did not match the expected shape
    #[error("unexpected status response: {0}")]
    Decode(String),
}

/// A job that did not reach `done`
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// The job reported a non-empty status message
    #[error("job {job_id} failed: {message}")]
    Failed {
        /// The failed job
        job_id: String,
        /// Server-provided status message
        message: String,
        /// Last observed percent
        percent: u32,
    },

    /// Polling gave up after the configured job timeout
    #[error("job {job_id} still unfinished after {}s", waited.as_secs())]
    TimedOut {
        /// The job being polled
        job_id: String,
        /// How long polling ran
        waited: Duration,
        /// Last observed percent
        percent: u32,
    },

    /// The status lookup itself failed
    #[error(transparent)]
    Status(#[from] StatusError),
}

/// Errors while fetching an output artifact
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The completed job exposes no transfer format matching the request
    #[error("job {job_id} has no transfer format matching {}", package_type.as_deref().unwrap_or("any"))]
    NoMatchingFormat {
        /// The job being downloaded
        job_id: String,
        /// The requested package type, if any
        package_type: Option<String>,
    },

    /// A server-supplied name would not stay inside the output directory
    #[error("refusing to write {name:?}: not a plain file name")]
    UnsafeFileName {
        /// The offending job id or format name
        name: String,
    },

    /// The artifact URL answered with a non-success status
    #[error("download of {url} failed with status {status}")]
    Http {
        /// Artifact URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// The request or body stream failed
    #[error("download of {url} failed: {reason}")]
    Transport {
        /// Artifact URL
        url: String,
        /// Underlying failure
        reason: String,
    },

    /// Writing the output file failed
    #[error("failed to write {path}: {reason}")]
    Io {
        /// Output file
        path: PathBuf,
        /// Underlying I/O failure
        reason: String,
    },
}

/// Errors from the account, listing and execute endpoints
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service answered with a non-success status
    #[error("{path} answered with status {status}: {body}")]
    Http {
        /// Request path
        path: String,
        /// HTTP status code
        status: u16,
        /// Raw response body
        body: String,
    },

    /// The request never produced a response
    #[error("request to {path} failed: {reason}")]
    Transport {
        /// Request path
        path: String,
        /// Underlying failure
        reason: String,
    },

    /// The response body did not match the expected shape
    #[error("unexpected response from {path}: {reason}")]
    Decode {
        /// Request path
        path: String,
        /// Parse failure
        reason: String,
    },

    /// A local file sent with the request could not be read
    #[error("failed to read {path}: {reason}")]
    Io {
        /// File that could not be read
        path: PathBuf,
        /// Underlying I/O failure
        reason: String,
    },
}

/// Stable machine-readable classification of an error
///
/// The binary maps these codes into JSON output and process exit statuses.
pub trait ErrorCode {
    /// Machine-readable error code (snake_case)
    fn error_code(&self) -> &str;

    /// Process exit code when this error ends the invocation
    fn exit_code(&self) -> i32 {
        1
    }
}

impl ErrorCode for InputError {
    fn error_code(&self) -> &str {
        match self {
            InputError::UnsupportedBatchType { .. } => "unsupported_batch_type",
            InputError::ArchiveExtractionFailed { .. } => "archive_extraction_failed",
            InputError::NotSupported { .. } => "not_supported",
            InputError::Listing { .. } => "batch_listing_failed",
        }
    }
}

impl ErrorCode for UploadError {
    fn error_code(&self) -> &str {
        match self {
            UploadError::Rejected { .. } => "upload_rejected",
            UploadError::Transport(_) => "upload_transport_error",
            UploadError::Io { .. } => "upload_io_error",
            UploadError::Decode(_) => "upload_decode_error",
        }
    }
}

impl ErrorCode for StatusError {
    fn error_code(&self) -> &str {
        match self {
            StatusError::NotFound { .. } => "job_not_found",
            StatusError::Http { .. } => "status_http_error",
            StatusError::Transport(_) => "status_transport_error",
            StatusError::Decode(_) => "status_decode_error",
        }
    }

    fn exit_code(&self) -> i32 {
        match self {
            // "no such job" is a clean early exit, not a crash
            StatusError::NotFound { .. } => 0,
            _ => 1,
        }
    }
}

impl ErrorCode for ProcessingError {
    fn error_code(&self) -> &str {
        match self {
            ProcessingError::Failed { .. } => "processing_failed",
            ProcessingError::TimedOut { .. } => "poll_timeout",
            ProcessingError::Status(e) => e.error_code(),
        }
    }
}

impl ErrorCode for DownloadError {
    fn error_code(&self) -> &str {
        match self {
            DownloadError::NoMatchingFormat { .. } => "no_matching_format",
            DownloadError::UnsafeFileName { .. } => "unsafe_file_name",
            DownloadError::Http { .. } => "download_http_error",
            DownloadError::Transport { .. } => "download_transport_error",
            DownloadError::Io { .. } => "download_io_error",
        }
    }
}

impl ErrorCode for ServiceError {
    fn error_code(&self) -> &str {
        match self {
            ServiceError::Http { .. } => "service_http_error",
            ServiceError::Transport { .. } => "service_transport_error",
            ServiceError::Decode { .. } => "service_decode_error",
            ServiceError::Io { .. } => "service_io_error",
        }
    }
}

impl ErrorCode for Error {
    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Input(e) => e.error_code(),
            Error::Upload(e) => e.error_code(),
            Error::Status(e) => e.error_code(),
            Error::Download(e) => e.error_code(),
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::Service(e) => e.error_code(),
        }
    }

    fn exit_code(&self) -> i32 {
        match self {
            Error::Status(e) => e.exit_code(),
            _ => 1,
        }
    }
}

/// Error output for the JSON display mode
///
/// # Example JSON
///
/// ```json
/// {
///   "error": {
///     "code": "unsupported_batch_type",
///     "message": "input error: batch processing is only available for the photo input type (got rgbd)",
///     "details": { "input_type": "rgbd" }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for JSON output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "job_not_found")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for ErrorReport {
    fn from(error: &Error) -> Self {
        let details = match error {
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({ "key": key })),
            Error::Input(InputError::UnsupportedBatchType { input_type }) => {
                Some(serde_json::json!({ "input_type": input_type }))
            }
            Error::Input(InputError::ArchiveExtractionFailed { archive, .. }) => {
                Some(serde_json::json!({ "archive": archive }))
            }
            Error::Input(InputError::NotSupported { path }) => {
                Some(serde_json::json!({ "input": path }))
            }
            Error::Upload(UploadError::Rejected { status, body, .. }) => {
                Some(serde_json::json!({ "status_code": status, "body": body }))
            }
            Error::Status(StatusError::NotFound { id }) => {
                Some(serde_json::json!({ "job_id": id }))
            }
            Error::Status(StatusError::Http { id, status, .. }) => {
                Some(serde_json::json!({ "job_id": id, "status_code": status }))
            }
            Error::Service(ServiceError::Http { path, status, .. }) => {
                Some(serde_json::json!({ "path": path, "status_code": status }))
            }
            _ => None,
        };

        ErrorReport {
            error: ErrorDetail {
                code: error.error_code().to_string(),
                message: error.to_string(),
                details,
            },
        }
    }
}
