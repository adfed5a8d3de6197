//! The queue service: validated submission, leasing, result reporting and
//! cancellation on top of a [`QueueBackend`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::backend::{BoxStream, CancelOutcome, QueueBackend};
use crate::handler::HandlerRegistry;
use crate::notify::{NotificationSink, TracingSink};
use crate::observability::{LiveMetrics, MetricsSnapshot};
use crate::{
    Job, JobData, JobError, JobEvent, JobId, JobMessage, JobPayload, JobStatus, JobType,
    LeaseToken, LeasedJob, QueueConfig, QueueError, QueueResult, QueueStats,
};

/// What `report_result` did with the job
#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    Succeeded,
    /// Back in the queue; `attempt` is the attempt that just failed
    Retrying {
        attempt: u32,
        retry_at: DateTime<Utc>,
    },
    /// Terminal failure: `RetriesExhausted` or `HandlerExecutionFailure`
    Failed(QueueError),
    Canceled,
}

/// Typed job queue
pub struct QueueService {
    backend: Arc<dyn QueueBackend>,
    registry: Arc<HandlerRegistry>,
    sink: Arc<dyn NotificationSink>,
    metrics: Arc<LiveMetrics>,
    config: QueueConfig,
    /// Wakes workers parked in `next_job`
    arrivals: Notify,
    /// Cancellation tokens of leased jobs
    running: Mutex<HashMap<JobId, CancellationToken>>,
}

impl QueueService {
    pub fn new(
        backend: Arc<dyn QueueBackend>,
        registry: HandlerRegistry,
        config: QueueConfig,
    ) -> Self {
        Self {
            backend,
            registry: Arc::new(registry),
            sink: Arc::new(TracingSink),
            metrics: Arc::new(LiveMetrics::new()),
            config,
            arrivals: Notify::new(),
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Submit a job. The payload must match the declared tag and a handler
    /// must be registered for it.
    #[instrument(skip(self, message), fields(job_type = %message.job_type))]
    pub async fn enqueue(&self, message: JobMessage) -> QueueResult<JobId> {
        message.validate()?;

        let job_type = message.job_type;
        if !self.registry.is_registered(job_type) {
            return Err(QueueError::NoHandlerRegistered(job_type));
        }

        let job_id = self.backend.enqueue(message).await?;
        self.metrics.increment_jobs_enqueued(job_type);
        self.arrivals.notify_waiters();

        info!("Enqueued job {} of type {}", job_id, job_type);
        Ok(job_id)
    }

    /// Submit typed data; the tag comes from `D::JOB_TYPE`
    pub async fn enqueue_data<D: JobData>(&self, data: D) -> QueueResult<JobId> {
        self.enqueue(JobMessage::typed(data)).await
    }

    /// Submit untyped JSON declared as `job_type`
    pub async fn enqueue_raw(&self, job_type: JobType, payload: Value) -> QueueResult<JobId> {
        let payload = JobPayload::from_json(job_type, payload)?;
        self.enqueue(JobMessage::new(job_type, payload)).await
    }

    /// Lease the next job of any kind. `EmptyQueue` when nothing is ready.
    pub async fn dequeue(&self) -> QueueResult<LeasedJob> {
        self.dequeue_kinds(&[]).await
    }

    /// Lease the next job of one of `kinds` (all kinds when empty)
    pub async fn dequeue_kinds(&self, kinds: &[JobType]) -> QueueResult<LeasedJob> {
        let leased = self
            .backend
            .dequeue(kinds)
            .await?
            .ok_or(QueueError::EmptyQueue)?;

        // A cancel may have landed between the lease and this point
        self.running.lock().entry(leased.id().clone()).or_default();

        debug!(
            "Leased job {} ({}) attempt {}/{}",
            leased.id(),
            leased.job_type(),
            leased.job.attempt,
            leased.job.max_attempts
        );
        Ok(leased)
    }

    /// Wait for the next job. Parks until a job is enqueued or
    /// `poll_interval` passes, then tries again. `None` once `shutdown` fires.
    pub async fn next_job(
        &self,
        kinds: &[JobType],
        shutdown: &CancellationToken,
    ) -> QueueResult<Option<LeasedJob>> {
        loop {
            if shutdown.is_cancelled() {
                return Ok(None);
            }

            // Register interest before looking so an enqueue in between is not missed
            let notified = self.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.dequeue_kinds(kinds).await {
                Ok(leased) => return Ok(Some(leased)),
                Err(QueueError::EmptyQueue) => {}
                Err(e) => return Err(e),
            }

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(None),
                _ = &mut notified => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Token that fires when `cancel` is called for a leased job. Jobs that
    /// are not leased get a detached token that never fires.
    pub fn cancellation_token(&self, job_id: &JobId) -> CancellationToken {
        self.running
            .lock()
            .get(job_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Record the outcome of a run. Only the current lease holder may report.
    #[instrument(skip(self, lease_token, outcome), fields(job_id = %job_id))]
    pub async fn report_result(
        &self,
        job_id: &JobId,
        lease_token: &LeaseToken,
        outcome: Result<(), JobError>,
    ) -> QueueResult<ReportOutcome> {
        let result = match outcome {
            Ok(()) => {
                let job = self.backend.ack_complete(job_id, lease_token).await?;
                self.metrics.increment_jobs_completed(job.job_type);
                info!("Job {} completed on attempt {}", job_id, job.attempt);
                ReportOutcome::Succeeded
            }
            Err(JobError::Canceled) => {
                let job = self.backend.get(job_id).await?;
                if job.cancel_requested {
                    let job = self.backend.ack_canceled(job_id, lease_token).await?;
                    self.metrics.increment_jobs_canceled(job.job_type);
                    info!("Job {} canceled on request", job_id);
                    ReportOutcome::Canceled
                } else {
                    // Nobody asked for this; treat it like any transient failure
                    let error = JobError::retryable("Handler stopped without a cancel request");
                    self.fail(&job, lease_token, error).await?
                }
            }
            Err(error) => {
                let job = self.backend.get(job_id).await?;
                self.fail(&job, lease_token, error).await?
            }
        };

        self.running.lock().remove(job_id);
        Ok(result)
    }

    async fn fail(
        &self,
        job: &Job,
        lease_token: &LeaseToken,
        error: JobError,
    ) -> QueueResult<ReportOutcome> {
        let retry_at = if error.is_retryable() && job.has_attempts_left() {
            let backoff = self.config.retry_backoff(job.attempt);
            let retry_at = chrono::Duration::from_std(backoff)
                .ok()
                .and_then(|backoff| Utc::now().checked_add_signed(backoff))
                .ok_or_else(|| {
                    let message = format!("retry backoff {:?} overflows the clock", backoff);
                    QueueError::InvalidConfig(message)
                })?;
            Some(retry_at)
        } else {
            None
        };

        let updated = self
            .backend
            .ack_fail(&job.id, lease_token, error.message().to_string(), retry_at)
            .await?;

        match (&updated.status, retry_at) {
            (JobStatus::Canceled { .. }, _) => {
                self.metrics.increment_jobs_canceled(updated.job_type);
                info!("Job {} canceled instead of retried: {}", updated.id, error);
                Ok(ReportOutcome::Canceled)
            }
            (JobStatus::Pending, Some(retry_at)) => {
                self.metrics.increment_jobs_retried(updated.job_type);
                warn!(
                    "Job {} failed attempt {}/{}, retrying at {}: {}",
                    updated.id, updated.attempt, updated.max_attempts, retry_at, error
                );
                Ok(ReportOutcome::Retrying {
                    attempt: updated.attempt,
                    retry_at,
                })
            }
            _ => {
                let error = if error.is_retryable() {
                    QueueError::RetriesExhausted {
                        job_id: updated.id.clone(),
                        attempts: updated.attempt,
                        last_error: error.message().to_string(),
                    }
                } else {
                    QueueError::HandlerExecutionFailure(error)
                };
                self.metrics.increment_jobs_failed(updated.job_type);
                self.sink.job_failed(&updated, &error).await;
                Ok(ReportOutcome::Failed(error))
            }
        }
    }

    pub async fn status(&self, job_id: &JobId) -> QueueResult<JobStatus> {
        self.backend.status(job_id).await
    }

    pub async fn job(&self, job_id: &JobId) -> QueueResult<Job> {
        self.backend.get(job_id).await
    }

    /// Withdraw a pending job, or ask a running one to stop
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn cancel(&self, job_id: &JobId) -> QueueResult<CancelOutcome> {
        let outcome = self.backend.cancel(job_id).await?;

        match outcome {
            CancelOutcome::Withdrawn => {
                let job = self.backend.get(job_id).await?;
                self.metrics.increment_jobs_canceled(job.job_type);
                info!("Withdrew pending job {}", job_id);
            }
            CancelOutcome::Requested => {
                // The lease may not have reached `running` yet, so leave a
                // fired token for `dequeue_kinds` to pick up
                self.running.lock().entry(job_id.clone()).or_default().cancel();

                // The run may also have ended since the backend answered
                if !self.backend.status(job_id).await?.is_running() {
                    self.running.lock().remove(job_id);
                }
                info!("Requested cancellation of running job {}", job_id);
            }
            CancelOutcome::AlreadyFinished => {
                debug!("Cancel of finished job {} ignored", job_id);
            }
        }

        Ok(outcome)
    }

    /// Take back jobs whose lease ran out. Returns how many were reclaimed.
    pub async fn reclaim_expired(&self) -> QueueResult<usize> {
        let reclaimed = self.backend.reclaim_expired(Utc::now()).await?;

        for job in &reclaimed {
            // The old holder can no longer report, so stop it if it is still going
            let token = self.running.lock().remove(&job.id);
            if let Some(token) = token {
                token.cancel();
            }
            self.metrics.increment_jobs_reclaimed(job.job_type);

            match &job.status {
                JobStatus::Failed { error, .. } => {
                    let error = QueueError::RetriesExhausted {
                        job_id: job.id.clone(),
                        attempts: job.attempt,
                        last_error: error.clone(),
                    };
                    self.metrics.increment_jobs_failed(job.job_type);
                    self.sink.job_failed(job, &error).await;
                }
                JobStatus::Canceled { .. } => self.metrics.increment_jobs_canceled(job.job_type),
                _ => self.metrics.increment_jobs_retried(job.job_type),
            }
        }

        if !reclaimed.is_empty() {
            self.arrivals.notify_waiters();
        }
        Ok(reclaimed.len())
    }

    /// Account for jobs that `restore` settled: a run interrupted on its
    /// last attempt counts as a terminal failure.
    pub async fn settle_restored(&self, jobs: &[Job]) {
        for job in jobs {
            match &job.status {
                JobStatus::Failed { error, .. } => {
                    let error = QueueError::RetriesExhausted {
                        job_id: job.id.clone(),
                        attempts: job.attempt,
                        last_error: error.clone(),
                    };
                    self.metrics.increment_jobs_failed(job.job_type);
                    self.sink.job_failed(job, &error).await;
                }
                JobStatus::Canceled { .. } => self.metrics.increment_jobs_canceled(job.job_type),
                _ => {}
            }
        }
    }

    /// Drop terminal jobs older than the retention window
    pub async fn purge_expired(&self) -> QueueResult<usize> {
        // A window reaching past the clock's range means nothing is old enough yet
        let Some(cutoff) = chrono::Duration::from_std(self.config.retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention))
        else {
            return Ok(0);
        };
        let purged = self.backend.purge_terminal(cutoff).await?;
        Ok(purged.len())
    }

    pub async fn stats(&self) -> QueueResult<QueueStats> {
        self.backend.stats().await
    }

    /// Lifecycle events from now on
    pub fn events(&self) -> BoxStream<JobEvent> {
        self.backend.event_stream()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn live_metrics(&self) -> &LiveMetrics {
        &self.metrics
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }
}

impl std::fmt::Debug for QueueService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueService")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::handler::{JobContext, JobHandler};
    use crate::{EmailJobData, GenericJobData};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Noop;

    #[async_trait]
    impl JobHandler for Noop {
        type Data = EmailJobData;

        async fn handle(&self, _data: EmailJobData, _ctx: JobContext) -> Result<(), JobError> {
            Ok(())
        }
    }

    fn service(config: QueueConfig) -> QueueService {
        let mut registry = HandlerRegistry::new();
        registry.register(Noop).unwrap();
        QueueService::new(Arc::new(MemoryBackend::new(&config)), registry, config)
    }

    #[tokio::test]
    async fn test_unregistered_kind_is_rejected_at_enqueue() {
        let service = service(QueueConfig::default());
        let err = service
            .enqueue_data(GenericJobData::new("reindex", serde_json::json!({})))
            .await
            .unwrap_err();
        assert_eq!(err, QueueError::NoHandlerRegistered(JobType::GenericJobData));
    }

    #[tokio::test]
    async fn test_empty_queue_signal() {
        let service = service(QueueConfig::default());
        assert_eq!(service.dequeue().await.unwrap_err(), QueueError::EmptyQueue);
    }

    #[tokio::test]
    async fn test_retry_backoff_delays_next_attempt() {
        let config = QueueConfig::default()
            .with_retry_backoff(Duration::from_secs(60), Duration::from_secs(120));
        let service = service(config);

        let job_id = service
            .enqueue_data(EmailJobData::new("a@x.com", "welcome"))
            .await
            .unwrap();
        let leased = service.dequeue().await.unwrap();

        let outcome = service
            .report_result(&job_id, &leased.lease_token, Err(JobError::retryable("smtp down")))
            .await
            .unwrap();
        assert!(matches!(outcome, ReportOutcome::Retrying { attempt: 1, .. }));

        // Not eligible again until the backoff has passed
        assert_eq!(service.dequeue().await.unwrap_err(), QueueError::EmptyQueue);
        assert_eq!(service.metrics().global.jobs_retried, 1);
    }

    #[tokio::test]
    async fn test_next_job_wakes_on_enqueue() {
        let config = QueueConfig::default().with_poll_interval(Duration::from_secs(30));
        let service = Arc::new(service(config));
        let shutdown = CancellationToken::new();

        let waiter = {
            let service = service.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { service.next_job(&[], &shutdown).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let job_id = service
            .enqueue_data(EmailJobData::new("a@x.com", "welcome"))
            .await
            .unwrap();

        let leased = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(leased.id(), &job_id);
    }

    #[tokio::test]
    async fn test_next_job_returns_none_on_shutdown() {
        let service = service(QueueConfig::default());
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        assert!(service.next_job(&[], &shutdown).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_running_fires_token() {
        let service = service(QueueConfig::default());
        let job_id = service
            .enqueue_data(EmailJobData::new("a@x.com", "welcome"))
            .await
            .unwrap();
        let leased = service.dequeue().await.unwrap();
        let token = service.cancellation_token(&job_id);

        assert_eq!(service.cancel(&job_id).await.unwrap(), CancelOutcome::Requested);
        assert!(token.is_cancelled());

        let outcome = service
            .report_result(&job_id, &leased.lease_token, Err(JobError::Canceled))
            .await
            .unwrap();
        assert_eq!(outcome, ReportOutcome::Canceled);
        assert!(matches!(service.status(&job_id).await.unwrap(), JobStatus::Canceled { .. }));
    }

    #[tokio::test]
    async fn test_huge_retention_purges_nothing() {
        let config =
            QueueConfig::default().with_retention(Duration::from_secs(10_000_000_000_000));
        let service = service(config);
        let job_id = service
            .enqueue_data(EmailJobData::new("a@x.com", "welcome"))
            .await
            .unwrap();
        assert_eq!(service.cancel(&job_id).await.unwrap(), CancelOutcome::Withdrawn);

        assert_eq!(service.purge_expired().await.unwrap(), 0);
        assert!(service.job(&job_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_token_lookups_do_not_track_unleased_jobs() {
        let service = service(QueueConfig::default());

        let stray = service.cancellation_token(&JobId::from("never-enqueued"));
        assert!(!stray.is_cancelled());
        assert!(service.running.lock().is_empty());

        assert!(matches!(
            service.cancel(&JobId::from("never-enqueued")).await,
            Err(QueueError::JobNotFound(_))
        ));
        assert!(service.running.lock().is_empty());
    }

    #[tokio::test]
    async fn test_finished_job_leaves_no_token_behind() {
        let service = service(QueueConfig::default());
        let job_id = service
            .enqueue_data(EmailJobData::new("a@x.com", "welcome"))
            .await
            .unwrap();
        let leased = service.dequeue().await.unwrap();
        assert_eq!(service.running.lock().len(), 1);

        service.report_result(&job_id, &leased.lease_token, Ok(())).await.unwrap();
        assert!(service.running.lock().is_empty());

        assert_eq!(service.cancel(&job_id).await.unwrap(), CancelOutcome::AlreadyFinished);
        let _ = service.cancellation_token(&job_id);
        assert!(service.running.lock().is_empty());
    }
}
