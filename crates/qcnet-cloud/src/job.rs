//! Bounded wait on asynchronous provider jobs.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use qcnet_common::{QcnetError, QcnetResult};

use crate::types::{Job, JobStatus};

/// Default poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default time to wait for a job to finish.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(30);

/// Something that can report the current state of a job.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Describe one job. `None` when the provider did not return exactly one
    /// matching job, which the wait loop treats as "not visible yet".
    async fn describe_job(&self, job_id: &str) -> QcnetResult<Option<Job>>;
}

/// Poll until the job is terminal or `timeout` elapses.
///
/// Errors from the describe call abort the wait; they are not retried.
///
/// # Errors
///
/// [`QcnetError::JobTimeout`] when the deadline passes, or whatever the
/// describe call returned.
pub async fn wait_for_job<S>(
    source: &S,
    job_id: &str,
    timeout: Duration,
    interval: Duration,
) -> QcnetResult<Job>
where
    S: JobSource + ?Sized,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(job) = source.describe_job(job_id).await? {
            if job.status.is_terminal() {
                return Ok(job);
            }
            tracing::trace!(job_id, status = ?job.status, "Job still running");
        }

        if Instant::now() + interval > deadline {
            tracing::warn!(job_id, ?timeout, "Job did not finish in time");
            return Err(QcnetError::JobTimeout {
                job_id: job_id.to_string(),
            });
        }
        tokio::time::sleep(interval).await;
    }
}

/// Like [`wait_for_job`], but a `failed` job is an error.
///
/// # Errors
///
/// [`QcnetError::JobFailed`] with the provider's error codes, plus everything
/// [`wait_for_job`] returns.
pub async fn wait_for_job_success<S>(
    source: &S,
    job_id: &str,
    timeout: Duration,
    interval: Duration,
) -> QcnetResult<String>
where
    S: JobSource + ?Sized,
{
    let job = wait_for_job(source, job_id, timeout, interval).await?;
    if job.status == JobStatus::Successful {
        Ok(job.id)
    } else {
        Err(QcnetError::JobFailed {
            job_id: job.id,
            error_codes: job.error_codes,
        })
    }
}
