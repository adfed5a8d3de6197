//! Terminal failure notifications.

use async_trait::async_trait;
use tracing::error;

use crate::{Job, QueueError};

/// Told about every job that ends in `Failed`
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// `error` is `RetriesExhausted` when the attempts ran out, or the
    /// `HandlerExecutionFailure` that failed the job outright
    async fn job_failed(&self, job: &Job, error: &QueueError);
}

/// Default sink: an `error!` event per failed job
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn job_failed(&self, job: &Job, error: &QueueError) {
        error!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempts = job.attempt,
            error_kind = error.kind(),
            "Job failed permanently: {}",
            error
        );
    }
}
