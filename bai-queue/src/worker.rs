use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::service::{QueueService, ReportOutcome};
use crate::{JobError, JobType, LeasedJob, QueueError};

/// Fixed set of worker tasks pulling from a [`QueueService`]
pub struct WorkerPool {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    active: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Spawn `max_workers` workers serving every registered job type
    pub fn spawn(service: Arc<QueueService>) -> Self {
        let shutdown = CancellationToken::new();
        let active = Arc::new(AtomicUsize::new(0));
        let kinds = service.registry().registered_types();
        let count = service.config().max_workers;

        let handles = (0..count)
            .map(|id| {
                let worker = Worker {
                    id,
                    service: service.clone(),
                    kinds: kinds.clone(),
                    shutdown: shutdown.clone(),
                    active: active.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!("Started {} workers for {:?}", count, kinds);

        Self {
            shutdown,
            handles,
            active,
        }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Jobs being executed right now
    pub fn active_jobs(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Stop taking new jobs and wait for in-flight ones to be reported
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for result in futures::future::join_all(self.handles).await {
            if let Err(e) = result {
                error!("Worker task ended abnormally: {}", e);
            }
        }
        info!("Worker pool stopped");
    }
}

struct Worker {
    id: usize,
    service: Arc<QueueService>,
    kinds: Vec<JobType>,
    shutdown: CancellationToken,
    active: Arc<AtomicUsize>,
}

impl Worker {
    async fn run(self) {
        debug!("Worker {} started", self.id);

        loop {
            let leased = match self.service.next_job(&self.kinds, &self.shutdown).await {
                Ok(Some(leased)) => leased,
                Ok(None) => break,
                Err(e) => {
                    error!("Worker {} failed to fetch a job: {}", self.id, e);
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.service.config().poll_interval) => continue,
                    }
                }
            };

            self.active.fetch_add(1, Ordering::Relaxed);
            self.process(leased).await;
            self.active.fetch_sub(1, Ordering::Relaxed);
        }

        debug!("Worker {} stopped", self.id);
    }

    #[instrument(
        skip(self, leased),
        fields(worker = self.id, job_id = %leased.id(), job_type = %leased.job_type())
    )]
    async fn process(&self, leased: LeasedJob) {
        let token = self.service.cancellation_token(leased.id());
        let timeout = self.service.config().job_timeout;
        let started = Instant::now();

        let outcome = match tokio::time::timeout(
            timeout,
            self.service.registry().dispatch(&leased.job, token),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(JobError::retryable(format!("Job timed out after {:?}", timeout))),
        };

        self.service
            .live_metrics()
            .record_execution_time(leased.job_type(), started.elapsed());

        match self
            .service
            .report_result(leased.id(), &leased.lease_token, outcome)
            .await
        {
            Ok(ReportOutcome::Failed(e)) => debug!("Job {} ended failed: {}", leased.id(), e),
            Ok(_) => {}
            // The lease was lost while the handler ran; whoever holds it now owns the job
            Err(
                e @ (QueueError::InvalidLeaseToken
                | QueueError::LeaseExpired
                | QueueError::JobCanceled),
            ) => {
                warn!("Result for job {} discarded: {}", leased.id(), e);
            }
            Err(e) => error!("Failed to report result for job {}: {}", leased.id(), e),
        }
    }
}
