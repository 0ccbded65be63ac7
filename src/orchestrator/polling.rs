//! Poll-until-terminal loop.

use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::BatchOrchestrator;
use crate::client::DidimoApi;
use crate::error::{ErrorCode, ProcessingError};
use crate::types::{Event, JobId, JobKind, JobSnapshot, ProcessingFailure, TerminalState};

/// Turns raw percent readings into non-negative progress deltas.
///
/// Tracks the highest percent seen; a reading below it yields a zero delta
/// and does not lower the mark.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProgressTracker {
    high_water: u32,
}

impl ProgressTracker {
    /// Tracker starting at 0%
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reading and return how far progress advanced
    pub fn observe(&mut self, percent: u32) -> u32 {
        let delta = percent.saturating_sub(self.high_water);
        self.high_water = self.high_water.max(percent);
        delta
    }

    /// Highest percent observed so far
    pub fn high_water(&self) -> u32 {
        self.high_water
    }
}

/// Poll `job_id` every `interval` until it is done or reports a status message.
///
/// With `timeout` set, gives up with [`ProcessingError::TimedOut`] once that
/// much time has passed without reaching a terminal state.
pub async fn poll_until_terminal(
    api: &dyn DidimoApi,
    kind: JobKind,
    job_id: &JobId,
    interval: Duration,
    timeout: Option<Duration>,
    event_tx: &broadcast::Sender<Event>,
) -> Result<JobSnapshot, ProcessingError> {
    let started = Instant::now();
    let mut progress = ProgressTracker::new();

    loop {
        let snapshot = api.job_status(kind, job_id).await?;
        let delta = progress.observe(snapshot.percent);
        debug!(
            job_id = %job_id,
            status = ?snapshot.status,
            percent = snapshot.percent,
            delta,
            "polled job"
        );
        if delta > 0 {
            event_tx
                .send(Event::Progress {
                    job_id: job_id.clone(),
                    percent: snapshot.percent,
                    delta,
                })
                .ok();
        }

        match snapshot.terminal_state() {
            Some(TerminalState::Done) => {
                info!(job_id = %job_id, "job done");
                event_tx
                    .send(Event::JobDone {
                        job_id: job_id.clone(),
                    })
                    .ok();
                return Ok(snapshot);
            }
            Some(TerminalState::Failed(message)) => {
                warn!(job_id = %job_id, %message, "job failed");
                event_tx
                    .send(Event::JobFailed {
                        job_id: job_id.clone(),
                        error: message.clone(),
                    })
                    .ok();
                return Err(ProcessingError::Failed {
                    job_id: job_id.to_string(),
                    message,
                    percent: snapshot.percent,
                });
            }
            None => {}
        }

        if let Some(limit) = timeout {
            let waited = started.elapsed();
            if waited >= limit {
                let err = ProcessingError::TimedOut {
                    job_id: job_id.to_string(),
                    waited,
                    percent: progress.high_water(),
                };
                warn!(job_id = %job_id, "{}", err);
                event_tx
                    .send(Event::JobFailed {
                        job_id: job_id.clone(),
                        error: err.to_string(),
                    })
                    .ok();
                return Err(err);
            }
        }

        tokio::time::sleep(interval).await;
    }
}

impl BatchOrchestrator {
    /// Poll one uploaded item, turning any failure into its report record
    pub(super) async fn poll_item(
        &self,
        index: usize,
        job_id: &JobId,
    ) -> Result<JobSnapshot, ProcessingFailure> {
        poll_until_terminal(
            self.api.as_ref(),
            JobKind::Didimo,
            job_id,
            self.config.polling.job_interval,
            self.config.polling.job_timeout,
            &self.event_tx,
        )
        .await
        .map_err(|e| {
            let percent = match &e {
                ProcessingError::Failed { percent, .. } | ProcessingError::TimedOut { percent, .. } => {
                    Some(*percent)
                }
                ProcessingError::Status(_) => None,
            };
            ProcessingFailure {
                index,
                job_id: job_id.clone(),
                code: e.error_code().to_string(),
                percent,
                message: match e {
                    ProcessingError::Failed { message, .. } => message,
                    other => other.to_string(),
                },
            }
        })
    }
}
