//! # didimo-cli
//!
//! Client library and command-line tool for the didimo avatar service.
//!
//! The heart of the crate is [`BatchOrchestrator`]: it uploads every input
//! file, polls each job until it is done or failed, and downloads the
//! finished packages with at most `max_concurrent_downloads` background
//! workers, collecting every per-item outcome into a [`BatchReport`].
//!
//! ## Design
//!
//! - **Explicit configuration** - a [`Config`] value is handed to every
//!   client and orchestrator constructor; nothing is read from global state
//! - **Partial failure is normal** - per-item errors are recorded as data,
//!   only input resolution and configuration problems are fatal
//! - **Event-driven progress** - consumers subscribe to [`Event`]s instead of
//!   scraping logs
//! - **Testable seams** - all network access goes through the [`DidimoApi`]
//!   trait
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use didimo_cli::{
//!     BatchInputResolver, BatchOrchestrator, BatchRequest, Config, HttpClient, InputType,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(Config::new("https://api.didimo.co", "my-access-key"));
//!     let api = Arc::new(HttpClient::new(config.clone())?);
//!
//!     let resolver = BatchInputResolver::new(&config.download.scratch_dir);
//!     let input = resolver.resolve(Path::new("photos.zip"), InputType::Photo)?;
//!
//!     let orchestrator = BatchOrchestrator::new(api, config);
//!     let mut events = orchestrator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let report = orchestrator.run(BatchRequest::new(input, InputType::Photo)).await;
//!     std::process::exit(report.exit_code());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Remote service clients
pub mod client;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Batch input resolution
pub mod input;
/// Batch orchestration
pub mod orchestrator;
/// On-disk profile store
pub mod profile;
/// Result queue for background workers
pub mod result_queue;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use client::{DidimoApi, DownloadClient, HttpClient, StatusLookup};
pub use config::{Config, OutputDisplay};
pub use error::{
    DownloadError, Error, ErrorCode, ErrorDetail, ErrorReport, InputError, ProcessingError, Result,
    ServiceError, StatusError, UploadError,
};
pub use input::{BatchInputResolver, ResolvedInput, expand_stdin_ids};
pub use orchestrator::{
    BatchOrchestrator, BatchOutcome, BatchReport, BatchRequest, DeformationOutcome,
    DeformationReport, DeformationRequest, DeformationRunner,
};
pub use profile::{ProfileEntry, ProfileStore};
pub use result_queue::ResultQueue;
pub use types::{
    DownloadResult, Event, InputType, JobId, JobSnapshot, JobStatus, ProcessingFailure,
    UploadFailure,
};

/// Drive `work` to completion unless the process is asked to stop first.
///
/// Returns `None` when interrupted. Dropping `work` cancels it, including any
/// download workers it owns.
///
/// - **Unix:** stops on SIGTERM or SIGINT.
/// - **Windows/other:** stops on Ctrl+C.
pub async fn run_until_interrupted<F: std::future::Future>(work: F) -> Option<F::Output> {
    tokio::select! {
        output = work => Some(output),
        _ = shutdown_signal() => None,
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM, stopping"),
                _ = ctrl_c() => {}
            }
        }
        Err(e) => {
            // restricted environments may refuse the handler
            tracing::warn!(error = %e, "could not register SIGTERM handler, listening for Ctrl+C only");
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    ctrl_c().await;
}

/// Resolves on Ctrl+C; never resolves if the handler cannot be installed
async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received Ctrl+C, stopping"),
        Err(e) => {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}
