pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::{
    Job, JobEvent, JobId, JobMessage, JobStatus, JobType, LeaseToken, LeasedJob, QueueResult,
    QueueStats,
};

/// Type alias for boxed streams
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Result of a cancellation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// Job was still pending and will never run
    Withdrawn,
    /// Job is running; its handler has been asked to stop
    Requested,
    /// Job had already finished
    AlreadyFinished,
}

/// Storage primitives of a queue. Every method is atomic per job id.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Store a validated submission as a pending job
    async fn enqueue(&self, message: JobMessage) -> QueueResult<JobId>;

    /// Lease the next eligible job among `kinds` (all kinds when empty)
    async fn dequeue(&self, kinds: &[JobType]) -> QueueResult<Option<LeasedJob>>;

    /// Mark a leased job succeeded
    async fn ack_complete(&self, job_id: &JobId, lease_token: &LeaseToken) -> QueueResult<Job>;

    /// Record a failed attempt.
    ///
    /// With `retry_at` set and attempts left the job goes back to pending,
    /// otherwise it fails terminally.
    async fn ack_fail(
        &self,
        job_id: &JobId,
        lease_token: &LeaseToken,
        error: String,
        retry_at: Option<DateTime<Utc>>,
    ) -> QueueResult<Job>;

    /// Mark a leased job canceled after its handler honored a cancel request
    async fn ack_canceled(&self, job_id: &JobId, lease_token: &LeaseToken) -> QueueResult<Job>;

    async fn cancel(&self, job_id: &JobId) -> QueueResult<CancelOutcome>;

    async fn get(&self, job_id: &JobId) -> QueueResult<Job>;

    async fn status(&self, job_id: &JobId) -> QueueResult<JobStatus> {
        Ok(self.get(job_id).await?.status)
    }

    /// Return running jobs whose lease ended before `now` to the queue, or
    /// fail them when out of attempts. Returns the affected jobs.
    async fn reclaim_expired(&self, now: DateTime<Utc>) -> QueueResult<Vec<Job>>;

    /// Drop terminal jobs that finished before `cutoff`
    async fn purge_terminal(&self, cutoff: DateTime<Utc>) -> QueueResult<Vec<JobId>>;

    async fn stats(&self) -> QueueResult<QueueStats>;

    /// Lifecycle events from now on
    fn event_stream(&self) -> BoxStream<JobEvent>;
}
