//! Indexing job monitor.
//!
//! Polls a job at a fixed interval until it reaches a terminal state or the
//! attempt budget runs out. The interval never grows: jobs take minutes and
//! a status fetch is cheap.
//!
//! There is no cancel signal. Long-lived callers (the HTTP layer) do not hold
//! a poll open; they call [`JobMonitor::status`] on their own cadence
//! instead.

use std::time::Duration;

use crate::error::{GatewayError, MonitorError};
use crate::gateway::ResourceGateway;
use crate::models::{IndexingJob, JobStatus};
use crate::progress::{JobProgressEvent, ProgressReporter};

/// Poll budget for [`JobMonitor::poll`].
#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl From<&crate::config::MonitorConfig> for PollOptions {
    fn from(config: &crate::config::MonitorConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            interval: config.interval(),
        }
    }
}

pub struct JobMonitor<'a> {
    gateway: &'a dyn ResourceGateway,
}

impl<'a> JobMonitor<'a> {
    pub fn new(gateway: &'a dyn ResourceGateway) -> Self {
        Self { gateway }
    }

    /// One status fetch. A job the platform does not know is an upstream
    /// 404, so callers can tell it apart from a job that is merely pending.
    pub async fn status(&self, job_id: &str) -> Result<IndexingJob, GatewayError> {
        self.gateway
            .get_indexing_job(job_id)
            .await?
            .ok_or_else(|| GatewayError::Status {
                status: 404,
                message: format!("indexing job not found: {}", job_id),
            })
    }

    /// Poll until `COMPLETED` (returned), `FAILED` (error with the upstream
    /// text), or `max_attempts` fetches without a terminal state.
    ///
    /// `reporter` sees every attempt, the first included. Status fetch
    /// failures are not retried.
    pub async fn poll(
        &self,
        job_id: &str,
        options: &PollOptions,
        reporter: &dyn ProgressReporter,
    ) -> Result<IndexingJob, MonitorError> {
        let max_attempts = options.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let job = self.status(job_id).await?;
            reporter.report(&JobProgressEvent::from_job(&job, attempt));

            match job.status {
                JobStatus::Completed => {
                    tracing::info!(job_id, attempt, "indexing job completed");
                    return Ok(job);
                }
                JobStatus::Failed => {
                    let message = job
                        .error
                        .clone()
                        .unwrap_or_else(|| "indexing job failed".to_string());
                    tracing::warn!(job_id, attempt, %message, "indexing job failed");
                    return Err(MonitorError::IndexingFailed { message });
                }
                JobStatus::Pending | JobStatus::Running => {
                    tracing::debug!(job_id, attempt, status = %job.status, "indexing job active");
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(options.interval).await;
            }
        }

        tracing::warn!(job_id, attempts = max_attempts, "gave up polling indexing job");
        Err(MonitorError::IndexingTimeout {
            attempts: max_attempts,
        })
    }
}
